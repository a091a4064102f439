/// Crate-level error types for lazyref diagnostics.
use std::path::PathBuf;

/// Hard failures only. Resolution outcomes (not open, ambiguous, deleted, ...)
/// are reported through tagged state enums and never surface here.
/// Each variant names the file, identity, or reason for failure.
#[allow(clippy::error_impl_error, reason = "crate-level error type re-exported by the library")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bindings file exists but its records are out of order or duplicated.
    #[error("bindings corrupt: {reason}")]
    BindingsCorrupt {
        /// Description of the corruption.
        reason: String,
    },

    /// Expected bindings file does not exist on disk.
    #[error("bindings not found: {}", path.display())]
    BindingsNotFound {
        /// Path to the missing bindings file.
        path: PathBuf,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// JSON (de)serialization of a model snapshot failed.
    #[error("json: {0}")]
    Json(
        /// The wrapped JSON error.
        #[from]
        serde_json::Error,
    ),

    /// An identity could not be built or parsed. When raised while building
    /// an identity this is a caller-side precondition violation.
    #[error("malformed identity `{input}`: {reason}")]
    MalformedIdentity {
        /// The offending text.
        input: String,
        /// Why the text was rejected.
        reason: String,
    },

    /// Model snapshot parsed but describes an impossible model.
    #[error("snapshot corrupt: {reason}")]
    SnapshotCorrupt {
        /// Description of the inconsistency.
        reason: String,
    },

    /// Expected model snapshot does not exist on disk.
    #[error("snapshot not found: {}", path.display())]
    SnapshotNotFound {
        /// Path to the missing snapshot.
        path: PathBuf,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// TOML serialization failed.
    #[error("toml serialize: {0}")]
    TomlSer(
        /// The wrapped TOML serialization error.
        #[from]
        toml::ser::Error,
    ),

    /// No open document (or no unique one) matches the given text.
    #[error("unknown document: `{reference}` ({matches} matches)")]
    UnknownDocument {
        /// Titles of the open documents, for suggestions.
        candidates: Vec<String>,
        /// Number of open documents that matched.
        matches: usize,
        /// Text the user typed to identify the document.
        reference: String,
    },

    /// A configured classification rule is not usable.
    #[error("bad classification rule for `{subtype}`: {reason}")]
    UnknownSubtypeRule {
        /// Why the rule was rejected.
        reason: String,
        /// Subtype the rule was meant to produce.
        subtype: String,
    },
}

impl Error {
    /// Shorthand for a `MalformedIdentity` error.
    pub fn malformed(input: &str, reason: impl Into<String>) -> Self {
        return Self::MalformedIdentity {
            input: input.to_string(),
            reason: reason.into(),
        };
    }
}
