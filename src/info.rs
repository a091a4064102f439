use std::path::Path;

use serde::Serialize;

use lazyref::bindings::BindingsFile;
use lazyref::config::{CONFIG_FILE, Config};

use crate::commands::Paths;

/// Output the lazyref reference document.
pub fn run(root: &Path, paths: &Paths<'_>, json: bool) {
    let state = gather_state(root, paths);

    if json {
        print_json(&state);
    } else {
        print_markdown(&state);
    }
}

// ── State gathering ───────────────────────────────────────────────────

/// What the current directory holds.
struct CurrentState {
    /// Saved handles, if the bindings file reads.
    bindings_records: Option<usize>,
    /// Whether `.lazyref.toml` exists.
    config_found: bool,
    /// Whether the model snapshot exists.
    model_found: bool,
}

/// Inspect `root` without failing on anything. CLI overrides win over config.
fn gather_state(root: &Path, paths: &Paths<'_>) -> CurrentState {
    let config = Config::load(root).ok();
    let bindings = paths.bindings.or_else(|| return config.as_ref().map(Config::bindings));
    let model = paths.model.or_else(|| return config.as_ref().map(Config::model));

    let bindings_records = bindings
        .and_then(|p| return BindingsFile::read(p).ok())
        .map(|b| return b.records.len());
    let model_found = model.is_some_and(Path::exists);

    return CurrentState {
        bindings_records,
        config_found: root.join(CONFIG_FILE).exists(),
        model_found,
    };
}

// ── Markdown output ───────────────────────────────────────────────────

/// Full markdown document.
fn print_markdown(state: &CurrentState) {
    let version = env!("CARGO_PKG_VERSION");
    print_markdown_header(version);
    print_markdown_state(state);
    println!();
    print_markdown_exit_codes();
}

/// Static part of the document.
fn print_markdown_header(version: &str) {
    print!(
        "\
# lazyref {version}

Lazy, persistent references into externally owned CAD document models.

## Identity Syntax

    <fingerprint-guid>:<persistent-id>                         direct reference
    <fingerprint-guid>:<host-persistent-id>@<linked-id>        through a link instance

## Commands

    lazyref encode <guid> <id> [--linked <id>]   Build an identity string
    lazyref decode <identity>                    Split an identity string
    lazyref init                                 Save a handle for every object
    lazyref check                                Resolve saved handles (exit 0/1/2)
    lazyref list                                 Classify every object of every open document
    lazyref find <document> [<id>]               Look a document (and object) up
    lazyref info [--json]                        This document

## Configuration (.lazyref.toml)

    model = \"model.json\"              # host model snapshot
    bindings = \"bindings.toml\"        # saved handles
    log = \"warn\"                      # default log filter (RUST_LOG wins)

    [[rules]]
    runtime_type = \"Railing\"          # or: category = \"Furniture\"
    subtype = \"Railing\"

## Current State

"
    );
}

/// Dynamic part of the document.
fn print_markdown_state(state: &CurrentState) {
    if state.config_found {
        println!("Config:   {CONFIG_FILE} (found)");
    } else {
        println!("Config:   {CONFIG_FILE} (not found)");
    }

    if state.model_found {
        println!("Model:    found");
    } else {
        println!("Model:    not found");
    }

    match state.bindings_records {
        Some(n) => println!("Bindings: {n} handles"),
        None => println!("Bindings: not found"),
    }
}

/// Exit code table.
fn print_markdown_exit_codes() {
    print!(
        "\
## Exit Codes

| Code | Meaning |
|------|---------|
| 0    | Success / all handles resolved |
| 1    | Some handles unresolved (document or link not loaded) |
| 2    | Some handles ambiguous, deleted or invalid |
| 3    | Runtime error |
"
    );
}

// ── JSON output ───────────────────────────────────────────────────────

/// Top-level JSON document.
#[derive(Serialize)]
struct InfoJson {
    /// Current directory state.
    current_state: StateJson,
    /// Exit code table.
    exit_codes: Vec<ExitCodeInfo>,
    /// Crate version.
    version: String,
}

/// One exit code.
#[derive(Serialize)]
struct ExitCodeInfo {
    /// Process exit code.
    code: u8,
    /// What it means.
    meaning: String,
}

/// JSON form of [`CurrentState`].
#[derive(Serialize)]
struct StateJson {
    /// Saved handles, if readable.
    bindings_records: Option<usize>,
    /// Whether `.lazyref.toml` exists.
    config_found: bool,
    /// Whether the model snapshot exists.
    model_found: bool,
}

/// Print the JSON document.
fn print_json(state: &CurrentState) {
    let info = InfoJson {
        current_state: StateJson {
            bindings_records: state.bindings_records,
            config_found: state.config_found,
            model_found: state.model_found,
        },
        exit_codes: vec![
            ExitCodeInfo { code: 0, meaning: "Success / all handles resolved".to_string() },
            ExitCodeInfo { code: 1, meaning: "Some handles unresolved".to_string() },
            ExitCodeInfo { code: 2, meaning: "Some handles ambiguous, deleted or invalid".to_string() },
            ExitCodeInfo { code: 3, meaning: "Runtime error".to_string() },
        ],
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    // serde_json::to_string_pretty won't fail on this structure.
    let json = serde_json::to_string_pretty(&info).unwrap_or_default();
    println!("{json}");
}
