use std::fmt::Write as _;

use crate::error::Error;
use crate::handle::{ReferenceHandle, ResolveFailure};

/// Bold on.
const BOLD: &str = "\x1b[1m";
/// Attributes off.
const RESET: &str = "\x1b[0m";

/// Render an error as valid markdown with bold headings and print to stderr.
pub fn print_error(e: &Error) {
    let md = render_error(e);
    for line in md.lines() {
        if line.starts_with('#') {
            eprintln!("{BOLD}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
}

/// Render an error as a structured markdown diagnostic.
///
/// Each variant produces a block with what happened, and how to fix it
/// where there is something to fix.
pub fn render_error(e: &Error) -> String {
    return match e {
        Error::BindingsCorrupt { reason } => format!(
            "\
# Error: Bindings Corrupt

{reason}

## Fix

Records must be sorted by `Identity` with no repeats. Rewrite the file with
a tool that saves handles through `BindingsFile::new`.
"
        ),
        Error::BindingsNotFound { path } => format!(
            "\
# Error: Bindings Not Found

`{}` does not exist.

## Fix

Point `bindings` in `.lazyref.toml` at the saved handles, or pass `--bindings`.
",
            path.display()
        ),
        Error::Io(e) => format!("# Error: I/O\n\n{e}\n"),
        Error::Json(e) => format!("# Error: Invalid Model Snapshot\n\n{e}\n"),
        Error::MalformedIdentity { input, reason } => render_malformed_identity(input, reason),
        Error::SnapshotCorrupt { reason } => format!("# Error: Model Snapshot Inconsistent\n\n{reason}\n"),
        Error::SnapshotNotFound { path } => format!(
            "\
# Error: Model Snapshot Not Found

`{}` does not exist.

## Fix

Point `model` in `.lazyref.toml` at a host model snapshot, or pass `--model`.
",
            path.display()
        ),
        Error::TomlDe(e) => format!("# Error: Invalid TOML\n\n{e}\n"),
        Error::TomlSer(e) => format!("# Error: TOML Serialization\n\n{e}\n"),
        Error::UnknownDocument {
            candidates,
            matches,
            reference,
        } => render_unknown_document(reference, *matches, candidates),
        Error::UnknownSubtypeRule { reason, subtype } => format!(
            "\
# Error: Bad Classification Rule

The rule producing `{subtype}` is unusable: {reason}.

## Fix

Each `[[rules]]` entry needs `subtype` plus exactly one of:

    runtime_type = \"Wall\"
    category = \"Walls\"

`tag` may be added to a `runtime_type` rule.
"
        ),
    };
}

/// Malformed identity text.
fn render_malformed_identity(input: &str, reason: &str) -> String {
    return format!(
        "\
# Error: Malformed Identity

`{input}` is not a valid identity: {reason}.

## Expected

    <fingerprint-guid>:<persistent-id>
    <fingerprint-guid>:<host-persistent-id>@<linked-persistent-id>

`:` and `@` may not appear inside a persistent id.
"
    );
}

/// No unique document for the typed text.
fn render_unknown_document(reference: &str, matches: usize, candidates: &[String]) -> String {
    let mut out = if matches > 1 {
        format!(
            "\
# Error: Ambiguous Document

`{reference}` matches {matches} open documents.
"
        )
    } else {
        format!(
            "\
# Error: Unknown Document

No open document matches `{reference}`.
"
        )
    };

    if let Some(suggestion) = find_closest_suggestion(reference, candidates) {
        let _ = write!(out, "\n## Did you mean `{suggestion}`?\n");
    } else if !candidates.is_empty() {
        out.push_str("\n## Open documents\n\n");
        for c in candidates {
            let _ = writeln!(out, "- `{c}`");
        }
    }
    return out;
}

/// First candidate that matches once case and extension are ignored.
pub(crate) fn find_closest_suggestion(text: &str, candidates: &[String]) -> Option<String> {
    let normalized = strip_extension(text).to_ascii_lowercase();
    return candidates
        .iter()
        .find(|c| return strip_extension(c).to_ascii_lowercase() == normalized)
        .cloned();
}

/// Drop a trailing `.ext` and any leading directories.
fn strip_extension(text: &str) -> &str {
    let name = text.rsplit(['/', '\\']).next().unwrap_or(text);
    return name.rsplit_once('.').map_or(name, |(stem, _)| return stem);
}

/// One status line for `check`: tag, handle display, and why it failed.
pub fn render_status_line(handle: &ReferenceHandle) -> String {
    let tag = match handle.last_failure() {
        None if handle.live_value().is_some() => "OK",
        None => "PENDING",
        Some(failure) => match failure {
            ResolveFailure::Ambiguous { .. } => "AMBIGUOUS",
            ResolveFailure::LinkedDocumentNotLoaded | ResolveFailure::NotOpen => "UNRESOLVED",
            ResolveFailure::Malformed { .. } => "INVALID",
            ResolveFailure::Deleted
            | ResolveFailure::HostObjectMissing
            | ResolveFailure::IdentityMismatch { .. }
            | ResolveFailure::LinkInstanceMissing
            | ResolveFailure::TargetMissing => "DELETED",
        },
    };
    let mut line = format!("{tag:<10} {handle}");
    if let Some(reason) = handle.why_not() {
        let _ = write!(line, " ({reason})");
    }
    return line;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestion_ignores_case_and_extension() {
        let candidates = vec!["Tower".to_string(), "Podium".to_string()];
        assert_eq!(find_closest_suggestion("tower.rvt", &candidates), Some("Tower".to_string()));
        assert_eq!(find_closest_suggestion("C:\\x\\PODIUM.rvt", &candidates), Some("Podium".to_string()));
        assert_eq!(find_closest_suggestion("Annex", &candidates), None);
    }

    #[test]
    fn unknown_document_lists_candidates() {
        let e = Error::UnknownDocument {
            candidates: vec!["Tower".to_string()],
            matches: 0,
            reference: "Annex".to_string(),
        };
        let md = render_error(&e);
        assert!(md.starts_with("# Error: Unknown Document"), "heading missing:\n{md}");
        assert!(md.contains("- `Tower`"), "candidate missing:\n{md}");
    }

    #[test]
    fn ambiguous_document_has_its_own_heading() {
        let e = Error::UnknownDocument {
            candidates: Vec::new(),
            matches: 2,
            reference: "Tower".to_string(),
        };
        assert!(render_error(&e).starts_with("# Error: Ambiguous Document"), "wrong heading");
    }

    #[test]
    fn malformed_identity_shows_expected_forms() {
        let md = render_error(&Error::malformed("abc", "missing `:` delimiter"));
        assert!(md.contains("<fingerprint-guid>:<persistent-id>"), "format help missing:\n{md}");
    }

    #[test]
    fn status_line_names_the_failure() {
        let handle = ReferenceHandle::parse("garbage");
        let line = render_status_line(&handle);
        assert!(line.starts_with("INVALID"), "line: {line}");
        assert!(line.contains("⚠ Invalid "), "line: {line}");
    }

    #[test]
    fn status_line_for_untried_handle() {
        let handle = ReferenceHandle::parse("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b:A1");
        assert!(render_status_line(&handle).starts_with("PENDING"), "untried handle not pending");
    }
}
