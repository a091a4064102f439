//! Collaborator interfaces implemented by the host application.
//!
//! The host owns every document and object. This crate only ever holds
//! shared pointers handed out through these traits and never decides when
//! anything is created or destroyed.

use std::fmt;
use std::sync::Arc;

use crate::types::{DocumentIdentity, PersistentId};

/// Shared pointer to a live host document.
pub type DocumentRef = Arc<dyn LiveDocument>;

/// Shared pointer to a live host object.
pub type LiveRef = Arc<dyn LiveObject>;

/// Host-assigned key of one in-memory document instance. Two instances of
/// the same logical document (same fingerprint) have different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DocumentKey(
    /// Raw host value.
    pub u64,
);

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "#{}", self.0);
    }
}

/// Capability flags the type registry can classify on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Has model geometry.
    Geometric,
    /// Is drawn in some view.
    Graphical,
    /// Is a placed instance of a type.
    Instance,
}

/// Placement of a link instance in its host, as a 3x4 row-major affine
/// matrix. Opaque here: copied from the link and handed to geometry code.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Placement {
    /// Rotation/scale in the first three columns, translation in the fourth.
    pub rows: [[f64; 4]; 3],
}

impl Placement {
    /// No rotation, no translation.
    pub const IDENTITY: Self = Self {
        rows: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
    };

    /// Pure translation.
    pub const fn translation(x: f64, y: f64, z: f64) -> Self {
        return Self {
            rows: [[1.0, 0.0, 0.0, x], [0.0, 1.0, 0.0, y], [0.0, 0.0, 1.0, z]],
        };
    }
}

impl Default for Placement {
    fn default() -> Self {
        return Self::IDENTITY;
    }
}

/// What a link instance points at right now.
#[derive(Debug, Clone)]
pub struct LinkTarget {
    /// Nested document, or `None` while it is unloaded/detached.
    pub document: Option<DocumentRef>,
    /// Where the nested document sits inside the host.
    pub placement: Placement,
}

/// One live document instance.
pub trait LiveDocument: fmt::Debug + Send + Sync {
    /// In-memory instance key.
    fn key(&self) -> DocumentKey;

    /// Current identity, with presentation metadata as fresh as the host has it.
    fn identity(&self) -> DocumentIdentity;

    /// Title shown to users.
    fn title(&self) -> String;

    /// False once the host has closed the instance; any pointer into it is stale.
    fn is_open(&self) -> bool;

    /// Whether this document is nested in another one through a link.
    fn is_linked(&self) -> bool {
        return false;
    }
}

/// One live object inside a document.
pub trait LiveObject: fmt::Debug + Send + Sync {
    /// Persistent id, re-derived from the live object itself.
    fn persistent_id(&self) -> PersistentId;

    /// Runtime type names, most derived first (e.g. `["Wall", "HostObject", "Element"]`).
    fn type_chain(&self) -> &[String];

    /// Category tag, if the object has one.
    fn category(&self) -> Option<&str>;

    /// Whether the object has a capability.
    fn has_feature(&self, feature: Feature) -> bool;

    /// User-facing name.
    fn name(&self) -> Option<&str> {
        return None;
    }

    /// `Some` iff this object is a link instance.
    fn link_target(&self) -> Option<LinkTarget> {
        return None;
    }

    /// Extra host-specific tags used by refined classification rules
    /// (e.g. `structural=beam`).
    fn has_tag(&self, _tag: &str) -> bool {
        return false;
    }
}

/// Enumerates open documents. Lifecycle notifications reach the crate as
/// [`crate::registry::DocumentEvent`]s passed to [`crate::session::Session::notify`].
pub trait LiveDocumentProvider {
    /// Every document currently open, in host order.
    fn open_documents(&self) -> Vec<DocumentRef>;
}

/// Looks objects up by persistent id.
pub trait LiveObjectStore {
    /// The live object with `id` inside `document`, or `None` if not found.
    fn find(&self, document: &dyn LiveDocument, id: &PersistentId) -> Option<LiveRef>;

    /// Every object in `document`. Stores that can't enumerate return nothing.
    fn objects(&self, _document: &dyn LiveDocument) -> Vec<LiveRef> {
        return Vec::new();
    }
}
