//! Bindings file persistence: parsing, serialization, and ordering enforcement.
//!
//! A bindings file is the set of handles an application saved, one record per
//! handle, stored with the host's own field names.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One persisted handle, in the host's structured save format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandleRecord {
    /// Document fingerprint, repeated for tools that don't parse `Identity`.
    #[serde(rename = "DocumentGUID", default, skip_serializing_if = "Option::is_none")]
    pub document_guid: Option<String>,
    /// The encoded identity string.
    #[serde(rename = "Identity")]
    pub identity: String,
    /// Model location when the handle was saved.
    #[serde(rename = "ModelURI", default, skip_serializing_if = "Option::is_none")]
    pub model_uri: Option<String>,
    /// Document path when the handle was saved.
    #[serde(rename = "PathName", default, skip_serializing_if = "Option::is_none")]
    pub path_name: Option<String>,
    /// Handle subtype name when the handle was saved.
    #[serde(rename = "Subtype", default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl HandleRecord {
    /// A record carrying only the identity string.
    pub fn bare(identity: impl Into<String>) -> Self {
        return Self {
            document_guid: None,
            identity: identity.into(),
            model_uri: None,
            path_name: None,
            subtype: None,
        };
    }
}

impl Ord for HandleRecord {
    /// Records are keyed by identity string; the rest is metadata.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        return self.identity.cmp(&other.identity);
    }
}

impl PartialOrd for HandleRecord {
    /// Delegate to `Ord` implementation.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        return Some(self.cmp(other));
    }
}

/// The bindings file as a whole. Records are sorted by identity string.
/// Constructed only via `BindingsFile::new()` or `BindingsFile::parse()`,
/// both of which enforce sorting and uniqueness.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BindingsFile {
    /// The ordered list of handle records.
    #[serde(default, rename = "handle")]
    pub records: Vec<HandleRecord>,
}

impl BindingsFile {
    /// Create a bindings file from unsorted records. Sorts and keeps the
    /// first record for each identity.
    pub fn new(mut records: Vec<HandleRecord>) -> Self {
        records.sort();
        records.dedup_by(|a, b| return a.identity == b.identity);
        return Self { records };
    }

    /// Parse a bindings file from TOML content.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the content is not valid TOML,
    /// or `Error::BindingsCorrupt` if records are not strictly sorted.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let bindings: Self = toml::from_str(content)?;
        enforce_record_ordering(&bindings.records)?;
        return Ok(bindings);
    }

    /// Read and parse a bindings file from disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::BindingsNotFound` if the file doesn't exist,
    /// `Error::Io` for other read failures,
    /// `Error::TomlDe` if the content is invalid TOML,
    /// or `Error::BindingsCorrupt` if records are not strictly sorted.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let content = match std::fs::read_to_string(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::BindingsNotFound { path: path.to_path_buf() });
            },
            Err(e) => return Err(Error::Io(e)),
            Ok(c) => c,
        };
        return Self::parse(&content);
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlSer` if serialization fails.
    pub fn serialize(&self) -> Result<String, Error> {
        return Ok(toml::to_string_pretty(self)?);
    }

    /// Write the bindings file to disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlSer` if serialization fails,
    /// or `Error::Io` if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let content = self.serialize()?;
        std::fs::write(path, content)?;
        return Ok(());
    }
}

/// Validate that records are strictly sorted by identity.
///
/// # Errors
///
/// Returns `Error::BindingsCorrupt` if any adjacent pair is out of order or repeated.
fn enforce_record_ordering(records: &[HandleRecord]) -> Result<(), Error> {
    for pair in records.windows(2) {
        let (Some(first), Some(second)) = (pair.first(), pair.get(1)) else {
            continue;
        };
        if first >= second {
            return Err(Error::BindingsCorrupt {
                reason: format!("records not sorted: `{}` >= `{}`", first.identity, second.identity),
            });
        }
    }
    return Ok(());
}
