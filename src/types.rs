//! Core identity types: document fingerprints, persistent ids and the
//! identities built from them.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;
use uuid::Uuid;

use crate::codec;
use crate::error::Error;

/// Canonical hyphenated GUID text, any case. Braced, URN and simple forms are
/// rejected so a fingerprint has exactly one accepted spelling.
static HYPHENATED_GUID: LazyLock<Regex> = LazyLock::new(|| {
    return Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("valid regex");
});

/// Host unique id layout: `<episode-guid>-<8 hex counter>`.
static EPISODE_COUNTER: LazyLock<Regex> = LazyLock::new(|| {
    return Regex::new(
        r"^(?<episode>[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})-(?<counter>[0-9a-fA-F]{8})$",
    )
    .expect("valid regex");
});

/// Logical identity of a document. Assigned once, survives save-as and rename.
/// Never nil: the nil GUID means "no document".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(
    /// The non-nil GUID.
    Uuid,
);

impl Fingerprint {
    /// Wrap a GUID.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` for the nil GUID.
    pub fn new(guid: Uuid) -> Result<Self, Error> {
        if guid.is_nil() {
            return Err(Error::malformed(&guid.to_string(), "nil fingerprint"));
        }
        return Ok(Self(guid));
    }

    /// Parse the canonical hyphenated text form.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` if the text is not a 36-character
    /// hyphenated GUID or is the nil GUID.
    pub fn parse(text: &str) -> Result<Self, Error> {
        if !HYPHENATED_GUID.is_match(text) {
            return Err(Error::malformed(text, "fingerprint is not a hyphenated GUID"));
        }
        let guid = Uuid::try_parse(text).map_err(|e| return Error::malformed(text, e.to_string()))?;
        return Self::new(guid);
    }

    /// The underlying GUID.
    pub const fn as_uuid(&self) -> &Uuid {
        return &self.0;
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0.hyphenated());
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        return Self::parse(&text);
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        return fingerprint.to_string();
    }
}

/// Per-document stable object id. Opaque to this crate apart from the
/// reserved delimiters, which it may never contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersistentId(
    /// The validated id text.
    String,
);

impl PersistentId {
    /// Validate and wrap an id.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` if the id is empty or contains a
    /// reserved delimiter (`:` or `@`).
    pub fn new(text: impl Into<String>) -> Result<Self, Error> {
        let text = text.into();
        if text.is_empty() {
            return Err(Error::malformed(&text, "empty persistent id"));
        }
        if let Some(reserved) = text.chars().find(|c| return codec::is_reserved(*c)) {
            return Err(Error::malformed(&text, format!("persistent id contains reserved `{reserved}`")));
        }
        return Ok(Self(text));
    }

    /// The id text.
    pub fn as_str(&self) -> &str {
        return &self.0;
    }

    /// Split a host unique id into its creation episode and per-episode counter.
    /// Returns `None` for ids that don't follow the `<guid>-<hex8>` layout;
    /// those are still valid, just opaque.
    pub fn parts(&self) -> Option<(Uuid, u32)> {
        let caps = EPISODE_COUNTER.captures(&self.0)?;
        let episode = Uuid::try_parse(caps.name("episode")?.as_str()).ok()?;
        let counter = u32::from_str_radix(caps.name("counter")?.as_str(), 16).ok()?;
        return Some((episode, counter));
    }

    /// Built-in objects are minted in the all-zero episode.
    pub fn is_built_in(&self) -> bool {
        return self.parts().is_some_and(|(episode, _)| return episode.is_nil());
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

impl TryFrom<String> for PersistentId {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        return Self::new(text);
    }
}

impl From<PersistentId> for String {
    fn from(id: PersistentId) -> Self {
        return id.0;
    }
}

/// A document's fingerprint plus best-effort presentation metadata.
/// Equality and hashing look at the fingerprint only.
#[derive(Debug, Clone)]
pub struct DocumentIdentity {
    /// User-visible path, refreshed opportunistically.
    pub display_path: Option<String>,
    /// The logical identity.
    pub fingerprint: Fingerprint,
    /// Model location, refreshed opportunistically.
    pub model_uri: Option<Url>,
}

impl DocumentIdentity {
    /// Identity with no presentation metadata.
    pub const fn bare(fingerprint: Fingerprint) -> Self {
        return Self {
            display_path: None,
            fingerprint,
            model_uri: None,
        };
    }

    /// File name component of the display path, if any.
    pub fn file_name(&self) -> Option<&str> {
        let path = self.display_path.as_deref()?;
        return path.rsplit(['/', '\\']).next().filter(|name| return !name.is_empty());
    }
}

impl PartialEq for DocumentIdentity {
    fn eq(&self, other: &Self) -> bool {
        return self.fingerprint == other.fingerprint;
    }
}

impl Eq for DocumentIdentity {}

impl Hash for DocumentIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

/// A direct reference: one object inside one logical document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullIdentity {
    /// Document the object lives in.
    pub fingerprint: Fingerprint,
    /// Object id within that document.
    pub persistent_id: PersistentId,
}

/// One hop through a link instance into a nested document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkChain {
    /// Id of the link instance inside the host document.
    pub host: PersistentId,
    /// Id of the target inside the nested document.
    pub linked: PersistentId,
}

/// Everything a handle can be asked to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// An object directly inside the fingerprinted document.
    Direct(FullIdentity),
    /// An object reached through a link instance of the fingerprinted (host) document.
    Linked {
        /// The two persistent ids of the hop.
        chain: LinkChain,
        /// Host document fingerprint.
        fingerprint: Fingerprint,
    },
}

impl Identity {
    /// Build a direct identity.
    pub const fn direct(fingerprint: Fingerprint, persistent_id: PersistentId) -> Self {
        return Self::Direct(FullIdentity {
            fingerprint,
            persistent_id,
        });
    }

    /// Build a link-chain identity rooted in the host document `fingerprint`.
    pub const fn linked(fingerprint: Fingerprint, host: PersistentId, linked: PersistentId) -> Self {
        return Self::Linked {
            chain: LinkChain { host, linked },
            fingerprint,
        };
    }

    /// Fingerprint of the document resolution starts from.
    pub const fn fingerprint(&self) -> Fingerprint {
        return match self {
            Self::Direct(full) => full.fingerprint,
            Self::Linked { fingerprint, .. } => *fingerprint,
        };
    }

    /// Persistent id of the object finally referenced.
    pub const fn target_id(&self) -> &PersistentId {
        return match self {
            Self::Direct(full) => &full.persistent_id,
            Self::Linked { chain, .. } => &chain.linked,
        };
    }

    /// Whether resolution has to hop through a link instance.
    pub const fn is_linked(&self) -> bool {
        return matches!(self, Self::Linked { .. });
    }

    /// Parse user input that is either a full identity, or a bare persistent
    /// id (optionally `host@linked`) meant for the document `scope`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` if the text doesn't parse, or if it
    /// is a full identity whose fingerprint is not `scope`.
    pub fn parse_lenient(text: &str, scope: Fingerprint) -> Result<Self, Error> {
        if text.contains(codec::ID_DELIMITER) {
            let identity = codec::decode(text)?;
            if identity.fingerprint() != scope {
                return Err(Error::malformed(text, format!("identity belongs to {}, not {scope}", identity.fingerprint())));
            }
            return Ok(identity);
        }
        return codec::decode(&format!("{scope}{}{text}", codec::ID_DELIMITER));
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&codec::encode_identity(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_rejects_non_hyphenated_forms() {
        let braced = "{3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b}";
        let simple = "3fa1c2d45b6e4f708a9b0c1d2e3f4a5b";
        assert!(Fingerprint::parse(braced).is_err(), "braced form accepted");
        assert!(Fingerprint::parse(simple).is_err(), "simple form accepted");
        assert!(Fingerprint::parse("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b").is_ok(), "canonical form rejected");
    }

    #[test]
    fn fingerprint_rejects_nil() {
        let nil = "00000000-0000-0000-0000-000000000000";
        assert!(Fingerprint::parse(nil).is_err(), "nil fingerprint accepted");
    }

    #[test]
    fn fingerprint_displays_lowercase() {
        let fp = Fingerprint::parse("3FA1C2D4-5B6E-4F70-8A9B-0C1D2E3F4A5B").unwrap();
        assert_eq!(fp.to_string(), "3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b");
    }

    #[test]
    fn persistent_id_rejects_reserved_delimiters() {
        assert!(PersistentId::new("a:b").is_err(), "colon accepted");
        assert!(PersistentId::new("a@b").is_err(), "at sign accepted");
        assert!(PersistentId::new("").is_err(), "empty id accepted");
        assert!(PersistentId::new("A1B2-3-7").is_ok(), "plain id rejected");
    }

    #[test]
    fn persistent_id_parts_split_episode_and_counter() {
        let id = PersistentId::new("60f91daf-3dd7-4283-a86d-24137b73f3da-0001fd0b").unwrap();
        let (episode, counter) = id.parts().unwrap();
        assert_eq!(episode.to_string(), "60f91daf-3dd7-4283-a86d-24137b73f3da");
        assert_eq!(counter, 0x0001_fd0b);
        assert!(!id.is_built_in(), "ordinary episode flagged built-in");
    }

    #[test]
    fn persistent_id_parts_are_optional() {
        let id = PersistentId::new("A1B2-3-7").unwrap();
        assert!(id.parts().is_none(), "opaque id parsed into parts");
    }

    #[test]
    fn zero_episode_is_built_in() {
        let id = PersistentId::new("00000000-0000-0000-0000-000000000000-fffffe0c").unwrap();
        assert!(id.is_built_in(), "zero episode not flagged built-in");
    }

    #[test]
    fn document_identity_equality_ignores_metadata() {
        let fp = Fingerprint::parse("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b").unwrap();
        let mut a = DocumentIdentity::bare(fp);
        let b = DocumentIdentity::bare(fp);
        a.display_path = Some("C:\\models\\tower.rvt".to_string());
        assert_eq!(a, b);
        assert_eq!(a.file_name(), Some("tower.rvt"));
    }

    #[test]
    fn lenient_parse_scopes_bare_ids() {
        let fp = Fingerprint::parse("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b").unwrap();
        let bare = Identity::parse_lenient("A1B2-3-7", fp).unwrap();
        assert_eq!(bare, Identity::direct(fp, PersistentId::new("A1B2-3-7").unwrap()));

        let chained = Identity::parse_lenient("L-1@T-9", fp).unwrap();
        assert!(chained.is_linked(), "host@linked not parsed as chain");
    }

    #[test]
    fn lenient_parse_rejects_foreign_fingerprint() {
        let scope = Fingerprint::parse("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b").unwrap();
        let foreign = "11111111-2222-4333-8444-555555555555:A1B2-3-7";
        assert!(Identity::parse_lenient(foreign, scope).is_err(), "foreign identity accepted");
    }
}
