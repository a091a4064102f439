//! In-memory host model: documents, objects and link instances that behave
//! like a real CAD host for the purposes of reference resolution.
//!
//! Loaded from a JSON [`ModelSnapshot`] by the CLI and built directly by tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::host::{
    DocumentKey, DocumentRef, Feature, LinkTarget, LiveDocument, LiveDocumentProvider, LiveObject, LiveObjectStore,
    LiveRef, Placement,
};
use crate::registry::DocumentEvent;
use crate::types::{DocumentIdentity, Fingerprint, PersistentId};

// ── Snapshot format ───────────────────────────────────────────────────

/// Whole host model as stored on disk.
#[derive(Debug, Deserialize)]
pub struct ModelSnapshot {
    /// Documents in opening order.
    pub documents: Vec<DocumentSpec>,
}

/// One document of a snapshot.
#[derive(Debug, Deserialize)]
pub struct DocumentSpec {
    /// Logical identity (hyphenated GUID).
    pub fingerprint: String,
    /// Nested documents are reachable only through link instances and are
    /// never reported as open top-level documents.
    #[serde(default)]
    pub linked: bool,
    /// Model location.
    #[serde(default)]
    pub model_uri: Option<Url>,
    /// Objects in the document.
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    /// User-visible path.
    #[serde(default)]
    pub path: Option<String>,
    /// Title; also how link specs name their nested document.
    pub title: String,
}

/// One object of a snapshot document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectSpec {
    /// Category tag.
    #[serde(default)]
    pub category: Option<String>,
    /// Capability flags.
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Persistent id.
    pub id: String,
    /// Present iff the object is a link instance.
    #[serde(default)]
    pub link: Option<LinkSpec>,
    /// User-facing name.
    #[serde(default)]
    pub name: Option<String>,
    /// Host-specific tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Runtime type chain, most derived first.
    #[serde(default)]
    pub types: Vec<String>,
}

/// Link instance details of an [`ObjectSpec`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkSpec {
    /// Title of the nested document; `None` for an unloaded link.
    #[serde(default)]
    pub document: Option<String>,
    /// Placement in the host.
    #[serde(default)]
    pub placement: Placement,
}

// ── Documents and objects ─────────────────────────────────────────────

/// A document held by [`MemoryHost`].
#[derive(Debug)]
pub struct MemoryDocument {
    /// Fingerprint plus metadata; metadata changes on rename.
    identity: RwLock<DocumentIdentity>,
    /// Instance key.
    key: DocumentKey,
    /// Nested-only document.
    linked: bool,
    /// Objects by persistent id.
    objects: RwLock<BTreeMap<PersistentId, Arc<MemoryObject>>>,
    /// Cleared when the host closes the instance.
    open: AtomicBool,
    /// Title.
    title: String,
}

impl MemoryDocument {
    /// This document as a shared trait object.
    pub fn document_ref(self: &Arc<Self>) -> DocumentRef {
        return Arc::clone(self) as DocumentRef;
    }

    /// Instance key.
    pub const fn key(&self) -> DocumentKey {
        return self.key;
    }

    /// Logical identity.
    pub fn fingerprint(&self) -> Fingerprint {
        return self.identity.read().fingerprint;
    }

    /// The object with `id`, if present.
    pub fn object(&self, id: &PersistentId) -> Option<Arc<MemoryObject>> {
        return self.objects.read().get(id).cloned();
    }

    /// Every object, ordered by persistent id.
    pub fn objects(&self) -> Vec<Arc<MemoryObject>> {
        return self.objects.read().values().cloned().collect();
    }
}

impl LiveDocument for MemoryDocument {
    fn key(&self) -> DocumentKey {
        return self.key;
    }

    fn identity(&self) -> DocumentIdentity {
        return self.identity.read().clone();
    }

    fn title(&self) -> String {
        return self.title.clone();
    }

    fn is_open(&self) -> bool {
        return self.open.load(Ordering::Acquire);
    }

    fn is_linked(&self) -> bool {
        return self.linked;
    }
}

/// Link instance state. The nested document can be detached and reloaded.
#[derive(Debug)]
struct MemoryLink {
    /// Currently loaded nested document.
    nested: RwLock<Option<Arc<MemoryDocument>>>,
    /// Placement in the host.
    placement: Placement,
}

/// An object held by a [`MemoryDocument`].
#[derive(Debug)]
pub struct MemoryObject {
    /// Category tag.
    category: Option<String>,
    /// Capability flags.
    features: Vec<Feature>,
    /// Persistent id.
    id: PersistentId,
    /// Link state, for link instances.
    link: Option<MemoryLink>,
    /// Name.
    name: Option<String>,
    /// Host-specific tags.
    tags: Vec<String>,
    /// Type chain, most derived first.
    type_chain: Vec<String>,
}

impl MemoryObject {
    /// This object as a shared trait object.
    pub fn live_ref(self: &Arc<Self>) -> LiveRef {
        return Arc::clone(self) as LiveRef;
    }
}

impl LiveObject for MemoryObject {
    fn persistent_id(&self) -> PersistentId {
        return self.id.clone();
    }

    fn type_chain(&self) -> &[String] {
        return &self.type_chain;
    }

    fn category(&self) -> Option<&str> {
        return self.category.as_deref();
    }

    fn has_feature(&self, feature: Feature) -> bool {
        return self.features.contains(&feature);
    }

    fn name(&self) -> Option<&str> {
        return self.name.as_deref();
    }

    fn link_target(&self) -> Option<LinkTarget> {
        let link = self.link.as_ref()?;
        let document = link.nested.read().as_ref().map(MemoryDocument::document_ref);
        return Some(LinkTarget {
            document,
            placement: link.placement,
        });
    }

    fn has_tag(&self, tag: &str) -> bool {
        return self.tags.iter().any(|t| return t == tag);
    }
}

// ── Host ──────────────────────────────────────────────────────────────

/// A whole in-memory host application.
#[derive(Debug, Default)]
pub struct MemoryHost {
    /// Every document instance ever opened and not yet closed, by key.
    documents: RwLock<BTreeMap<DocumentKey, Arc<MemoryDocument>>>,
    /// Lifecycle notifications not yet delivered.
    events: Mutex<Vec<DocumentEvent>>,
    /// Last key handed out.
    last_key: AtomicU64,
}

impl MemoryHost {
    /// Empty host.
    pub fn new() -> Self {
        return Self::default();
    }

    /// Read a JSON snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::SnapshotNotFound` if the file is missing, `Error::Json`
    /// if it doesn't parse, or any error from [`MemoryHost::from_snapshot`].
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = match std::fs::read_to_string(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound { path: path.to_path_buf() });
            },
            Err(e) => return Err(Error::Io(e)),
            Ok(c) => c,
        };
        let snapshot: ModelSnapshot = serde_json::from_str(&content)?;
        return Self::from_snapshot(&snapshot);
    }

    /// Build a host from a snapshot. Top-level documents emit `Opened`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` for a bad fingerprint or object id,
    /// or `Error::SnapshotCorrupt` when a link names no (or more than one)
    /// document, or an id repeats within a document.
    pub fn from_snapshot(snapshot: &ModelSnapshot) -> Result<Self, Error> {
        let host = Self::new();
        let mut created = Vec::with_capacity(snapshot.documents.len());
        for spec in &snapshot.documents {
            let identity = DocumentIdentity {
                display_path: spec.path.clone(),
                fingerprint: Fingerprint::parse(&spec.fingerprint)?,
                model_uri: spec.model_uri.clone(),
            };
            created.push(host.add_document(identity, &spec.title, spec.linked));
        }

        for (spec, document) in snapshot.documents.iter().zip(&created) {
            for object in &spec.objects {
                let nested = match object.link.as_ref().and_then(|l| return l.document.as_deref()) {
                    Some(title) => Some(find_by_title(&created, title)?),
                    None => None,
                };
                if document.object(&PersistentId::new(object.id.as_str())?).is_some() {
                    return Err(Error::SnapshotCorrupt {
                        reason: format!("duplicate id `{}` in `{}`", object.id, spec.title),
                    });
                }
                insert_into(document, object, nested)?;
            }
        }
        return Ok(host);
    }

    /// Allocate a key and file a new document. Emits `Opened` unless nested.
    fn add_document(&self, identity: DocumentIdentity, title: &str, linked: bool) -> Arc<MemoryDocument> {
        let key = DocumentKey(self.last_key.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
        let document = Arc::new(MemoryDocument {
            identity: RwLock::new(identity),
            key,
            linked,
            objects: RwLock::new(BTreeMap::new()),
            open: AtomicBool::new(true),
            title: title.to_string(),
        });
        self.documents.write().insert(key, Arc::clone(&document));
        if !linked {
            self.events.lock().push(DocumentEvent::Opened(document.document_ref()));
        }
        return document;
    }

    /// Open a top-level document.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` if `fingerprint` is not a canonical GUID.
    pub fn open_document(&self, fingerprint: &str, title: &str, path: Option<&str>) -> Result<Arc<MemoryDocument>, Error> {
        let identity = DocumentIdentity {
            display_path: path.map(str::to_string),
            fingerprint: Fingerprint::parse(fingerprint)?,
            model_uri: None,
        };
        return Ok(self.add_document(identity, title, false));
    }

    /// Load a document that is only reachable through link instances.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` if `fingerprint` is not a canonical GUID.
    pub fn load_linked_document(&self, fingerprint: &str, title: &str) -> Result<Arc<MemoryDocument>, Error> {
        let identity = DocumentIdentity::bare(Fingerprint::parse(fingerprint)?);
        return Ok(self.add_document(identity, title, true));
    }

    /// Close an instance. Emits `Closing` then `Closed`; a failed close
    /// leaves the document open.
    pub fn close_document(&self, key: DocumentKey, succeeded: bool) {
        let Some(document) = self.document(key) else {
            return;
        };
        let mut events = self.events.lock();
        if !document.linked {
            events.push(DocumentEvent::Closing(document.document_ref()));
        }
        if succeeded {
            document.open.store(false, Ordering::Release);
            self.documents.write().remove(&key);
        }
        if !document.linked {
            events.push(DocumentEvent::Closed { key, succeeded });
        }
    }

    /// Save-as: the fingerprint stays, the path changes.
    pub fn rename_document(&self, key: DocumentKey, path: &str) {
        if let Some(document) = self.document(key) {
            document.identity.write().display_path = Some(path.to_string());
        }
    }

    /// Instance by key.
    pub fn document(&self, key: DocumentKey) -> Option<Arc<MemoryDocument>> {
        return self.documents.read().get(&key).cloned();
    }

    /// Add (or re-create, e.g. on undo) an object.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` for a bad id, or
    /// `Error::SnapshotCorrupt` if the document or nested document is unknown.
    pub fn insert_object(&self, key: DocumentKey, spec: &ObjectSpec, nested: Option<DocumentKey>) -> Result<LiveRef, Error> {
        let document = self.document(key).ok_or_else(|| return unknown_key(key))?;
        let nested = match nested {
            Some(nested_key) => Some(self.document(nested_key).ok_or_else(|| return unknown_key(nested_key))?),
            None => None,
        };
        return insert_into(&document, spec, nested);
    }

    /// Delete an object. Returns whether it existed.
    pub fn remove_object(&self, key: DocumentKey, id: &PersistentId) -> bool {
        return self.document(key).is_some_and(|d| return d.objects.write().remove(id).is_some());
    }

    /// Point a link instance at `nested`, or detach it with `None`.
    pub fn set_link_document(&self, key: DocumentKey, link_id: &PersistentId, nested: Option<DocumentKey>) -> bool {
        let Some(link_object) = self.document(key).and_then(|d| return d.object(link_id)) else {
            return false;
        };
        let Some(link) = link_object.link.as_ref() else {
            return false;
        };
        *link.nested.write() = nested.and_then(|k| return self.document(k));
        return true;
    }

    /// Take every pending lifecycle notification, oldest first.
    pub fn drain_events(&self) -> Vec<DocumentEvent> {
        return std::mem::take(&mut *self.events.lock());
    }
}

impl LiveDocumentProvider for MemoryHost {
    fn open_documents(&self) -> Vec<DocumentRef> {
        return self
            .documents
            .read()
            .values()
            .filter(|d| return !d.linked && d.is_open())
            .map(MemoryDocument::document_ref)
            .collect();
    }
}

impl LiveObjectStore for MemoryHost {
    fn find(&self, document: &dyn LiveDocument, id: &PersistentId) -> Option<LiveRef> {
        let held = self.document(document.key())?;
        if !held.is_open() {
            return None;
        }
        return held.object(id).map(|o| return o.live_ref());
    }

    fn objects(&self, document: &dyn LiveDocument) -> Vec<LiveRef> {
        let Some(held) = self.document(document.key()).filter(|d| return d.is_open()) else {
            return Vec::new();
        };
        return held.objects().iter().map(MemoryObject::live_ref).collect();
    }
}

/// Build an object from its spec and file it in `document`.
///
/// # Errors
///
/// Returns `Error::MalformedIdentity` if the spec id is not a valid persistent id.
fn insert_into(document: &MemoryDocument, spec: &ObjectSpec, nested: Option<Arc<MemoryDocument>>) -> Result<LiveRef, Error> {
    let id = PersistentId::new(spec.id.as_str())?;
    let link = spec.link.as_ref().map(|l| {
        return MemoryLink {
            nested: RwLock::new(nested),
            placement: l.placement,
        };
    });
    let object = Arc::new(MemoryObject {
        category: spec.category.clone(),
        features: spec.features.clone(),
        id: id.clone(),
        link,
        name: spec.name.clone(),
        tags: spec.tags.clone(),
        type_chain: spec.types.clone(),
    });
    document.objects.write().insert(id, Arc::clone(&object));
    return Ok(object.live_ref());
}

/// The unique snapshot document titled `title`.
///
/// # Errors
///
/// Returns `Error::SnapshotCorrupt` unless exactly one document has that title.
fn find_by_title(documents: &[Arc<MemoryDocument>], title: &str) -> Result<Arc<MemoryDocument>, Error> {
    let matches: Vec<&Arc<MemoryDocument>> = documents.iter().filter(|d| return d.title == title).collect();
    return match matches.as_slice() {
        [only] => Ok(Arc::clone(only)),
        _ => Err(Error::SnapshotCorrupt {
            reason: format!("link names `{title}`, which matches {} documents", matches.len()),
        }),
    };
}

/// Error for a key the host doesn't know.
fn unknown_key(key: DocumentKey) -> Error {
    return Error::SnapshotCorrupt {
        reason: format!("no document with key {key}"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "documents": [
            {
                "fingerprint": "3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b",
                "title": "Tower",
                "path": "C:\\models\\Tower.rvt",
                "objects": [
                    { "id": "wall-1", "types": ["Wall", "HostObject", "Element"], "category": "Walls" },
                    { "id": "link-1", "types": ["LinkInstance", "Instance", "Element"],
                      "link": { "document": "Site", "placement": { "rows": [[1,0,0,5],[0,1,0,0],[0,0,1,0]] } } }
                ]
            },
            {
                "fingerprint": "11111111-2222-4333-8444-555555555555",
                "title": "Site",
                "linked": true,
                "objects": [ { "id": "topo-1", "types": ["Toposolid", "Element"] } ]
            }
        ]
    }"#;

    #[test]
    fn snapshot_builds_documents_and_links() {
        let snapshot: ModelSnapshot = serde_json::from_str(SNAPSHOT).unwrap();
        let host = MemoryHost::from_snapshot(&snapshot).unwrap();

        let open = host.open_documents();
        assert_eq!(open.len(), 1, "nested document reported as open");

        let tower = &open[0];
        let link = host.find(&**tower, &PersistentId::new("link-1").unwrap()).unwrap();
        let target = link.link_target().unwrap();
        assert_eq!(target.placement, Placement::translation(5.0, 0.0, 0.0));
        assert_eq!(target.document.unwrap().title(), "Site");
    }

    #[test]
    fn snapshot_emits_opened_for_top_level_only() {
        let snapshot: ModelSnapshot = serde_json::from_str(SNAPSHOT).unwrap();
        let host = MemoryHost::from_snapshot(&snapshot).unwrap();
        let events = host.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DocumentEvent::Opened(_)), "unexpected event {:?}", events[0]);
        assert!(host.drain_events().is_empty(), "events not drained");
    }

    #[test]
    fn snapshot_rejects_dangling_link() {
        let json = r#"{ "documents": [ { "fingerprint": "3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b", "title": "Tower",
            "objects": [ { "id": "link-1", "link": { "document": "Nowhere" } } ] } ] }"#;
        let snapshot: ModelSnapshot = serde_json::from_str(json).unwrap();
        assert!(matches!(MemoryHost::from_snapshot(&snapshot), Err(Error::SnapshotCorrupt { .. })), "dangling link accepted");
    }

    #[test]
    fn closed_documents_stop_answering_lookups() {
        let host = MemoryHost::new();
        let doc = host.open_document("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b", "Tower", None).unwrap();
        let spec = ObjectSpec { id: "wall-1".to_string(), ..ObjectSpec::default() };
        host.insert_object(doc.key(), &spec, None).unwrap();

        host.close_document(doc.key(), true);
        assert!(!doc.is_open(), "closed document still open");
        assert!(host.find(&*doc, &PersistentId::new("wall-1").unwrap()).is_none(), "closed document answered");
    }

    #[test]
    fn failed_close_keeps_document_open() {
        let host = MemoryHost::new();
        let doc = host.open_document("3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b", "Tower", None).unwrap();
        host.drain_events();
        host.close_document(doc.key(), false);
        assert!(doc.is_open(), "failed close closed the document");
        let events = host.drain_events();
        assert!(matches!(events.as_slice(), [DocumentEvent::Closing(_), DocumentEvent::Closed { succeeded: false, .. }]), "unexpected events {events:?}");
    }
}
