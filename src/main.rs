mod commands;
mod info;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lazyref::config::Config;
use lazyref::diagnostics;
use lazyref::error::Error;

use crate::commands::Paths;

/// Runtime errors (bad config, missing files, malformed input).
const EXIT_ERROR: u8 = 3;

#[derive(Parser)]
#[command(name = "lazyref", version, about = "Lazy, persistent references into CAD document models")]
struct Cli {
    /// Saved handles (overrides `bindings` in .lazyref.toml)
    #[arg(long, global = true)]
    bindings: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
    /// Host model snapshot (overrides `model` in .lazyref.toml)
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Project root holding .lazyref.toml
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every saved handle against the model (exit 0/1/2)
    Check,
    /// Split an identity string into its parts
    Decode {
        /// `<guid>:<id>` or `<guid>:<link-id>@<target-id>`
        identity: String,
    },
    /// Build an identity string from a document fingerprint and an object id
    Encode {
        /// Document fingerprint (hyphenated GUID)
        fingerprint: String,
        /// Persistent id (the link instance when --linked is given)
        id: String,
        /// Target id inside the linked document
        #[arg(long)]
        linked: Option<String>,
    },
    /// Find an open document by path, file name or title, and optionally an object in it
    Find {
        /// Path, file name or title
        document: String,
        /// Object id, `link@target`, or a full identity of that document
        id: Option<String>,
    },
    /// Show the reference document: syntax, commands, config, exit codes
    Info {
        /// Output as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Save a handle for every object of every open document
    Init,
    /// List open documents and classify every object
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load(&cli.root);
    init_tracing(config.as_ref().map_or("warn", Config::log));

    let paths = Paths {
        bindings: cli.bindings.as_deref(),
        model: cli.model.as_deref(),
    };
    let result = match cli.command {
        Commands::Check => config.and_then(|c| return commands::check(&c, &paths)),
        Commands::Decode { identity } => commands::decode(&identity),
        Commands::Encode { fingerprint, id, linked } => commands::encode(&fingerprint, &id, linked.as_deref()),
        Commands::Find { document, id } => {
            config.and_then(|c| return commands::find(&c, &paths, &document, id.as_deref()))
        },
        Commands::Info { json } => {
            info::run(&cli.root, &paths, json);
            Ok(ExitCode::SUCCESS)
        },
        Commands::Init => config.and_then(|c| return commands::init(&c, &paths)),
        Commands::List => config.and_then(|c| return commands::list(&c, &paths)),
    };
    return result.unwrap_or_else(|e| return report(&e));
}

/// Install the stderr subscriber. `RUST_LOG` wins over the config default.
fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| return EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print a markdown diagnostic and pick the runtime-error exit code.
fn report(e: &Error) -> ExitCode {
    diagnostics::print_error(e);
    return ExitCode::from(EXIT_ERROR);
}
