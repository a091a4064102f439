//! Directory of open documents keyed by fingerprint.
//!
//! Every write builds a fresh snapshot and publishes it with a single swap,
//! so a lifecycle callback that reads the registry while another write is in
//! flight sees either the old map or the new one, never a half-edited one.
//! Resolution refuses to pick between two documents sharing a fingerprint.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::host::{DocumentKey, DocumentRef, LiveDocument};
use crate::types::Fingerprint;

/// Host document lifecycle notifications.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    /// The close started with `Closing` has finished, successfully or not.
    Closed {
        /// Instance that was closing.
        key: DocumentKey,
        /// False when the host cancelled or failed the close.
        succeeded: bool,
    },
    /// The host is about to close this instance.
    Closing(DocumentRef),
    /// A new document was created.
    Created(DocumentRef),
    /// An existing document was opened.
    Opened(DocumentRef),
}

/// Outcome of looking a document up. Ambiguity is an answer, not an error.
#[derive(Debug, Clone)]
pub enum DocumentLookup {
    /// More than one open document matched.
    Ambiguous {
        /// How many matched.
        count: usize,
    },
    /// Exactly one open document matched.
    Found(DocumentRef),
    /// Nothing matched.
    NotOpen,
}

impl DocumentLookup {
    /// Classify a candidate list.
    fn from_matches(mut matches: Vec<DocumentRef>) -> Self {
        return match matches.len() {
            0 => Self::NotOpen,
            1 => matches.pop().map_or(Self::NotOpen, Self::Found),
            count => Self::Ambiguous { count },
        };
    }

    /// The document, if exactly one matched.
    pub fn found(self) -> Option<DocumentRef> {
        return match self {
            Self::Found(document) => Some(document),
            Self::Ambiguous { .. } | Self::NotOpen => None,
        };
    }
}

/// One published version of the registry.
#[derive(Debug, Default, Clone)]
struct Snapshot {
    /// Open instances per fingerprint, in registration order. Never holds an empty list.
    by_fingerprint: HashMap<Fingerprint, Vec<DocumentRef>>,
    /// Instances between `Closing` and `Closed`.
    closing: HashMap<DocumentKey, DocumentRef>,
    /// Bumped on every publication.
    generation: u64,
}

impl Snapshot {
    /// Insert unless the instance is already present.
    fn insert(&mut self, document: DocumentRef) -> bool {
        let fingerprint = document.identity().fingerprint;
        let twins = self.by_fingerprint.entry(fingerprint).or_default();
        if twins.iter().any(|twin| return twin.key() == document.key()) {
            return false;
        }
        twins.push(document);
        return true;
    }

    /// Remove the instance with `key`, wherever it is filed.
    fn remove(&mut self, key: DocumentKey) -> Option<DocumentRef> {
        let mut removed = None;
        self.by_fingerprint.retain(|_, twins| {
            if let Some(index) = twins.iter().position(|twin| return twin.key() == key) {
                removed = Some(twins.remove(index));
            }
            return !twins.is_empty();
        });
        return removed;
    }
}

/// Process-wide (but explicitly owned) directory of open documents.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    /// Current snapshot.
    snap: ArcSwap<Snapshot>,
}

impl DocumentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        return Self::default();
    }

    /// Publish a modified copy of the current snapshot if `edit` reports a change.
    fn publish(&self, action: &'static str, mut edit: impl FnMut(&mut Snapshot) -> bool) -> bool {
        let mut changed = false;
        self.snap.rcu(|current| {
            let mut next = Snapshot::clone(current);
            changed = edit(&mut next);
            if changed {
                next.generation = current.generation.wrapping_add(1);
            }
            return next;
        });
        if changed {
            debug!(target: "lazyref::registry", action, generation = self.generation(), "registry published");
        }
        return changed;
    }

    /// Add an instance under its fingerprint. Called on created/opened.
    /// Registering the same instance twice is a no-op.
    pub fn register(&self, document: DocumentRef) {
        let fingerprint = document.identity().fingerprint;
        let key = document.key();
        let inserted = self.publish("register", |snap| return snap.insert(Arc::clone(&document)));
        if inserted && self.count(fingerprint) > 1 {
            warn!(
                target: "lazyref::registry",
                fingerprint = %fingerprint,
                key = %key,
                "two open documents share a fingerprint; references into it are ambiguous"
            );
        }
    }

    /// Remove one specific instance. Returns whether it was registered.
    pub fn unregister(&self, document: &dyn LiveDocument) -> bool {
        let key = document.key();
        return self.publish("unregister", |snap| return snap.remove(key).is_some());
    }

    /// Closing: unregister now and park the instance until the host reports
    /// how the close went. Returns whether it was registered; an instance
    /// that wasn't is not parked and can never be restored.
    pub fn begin_close(&self, document: &dyn LiveDocument) -> bool {
        let key = document.key();
        return self.publish("begin_close", |snap| {
            let Some(removed) = snap.remove(key) else {
                return false;
            };
            snap.closing.insert(key, removed);
            return true;
        });
    }

    /// Closed: drop the parked instance, or re-register it if the close
    /// failed or was cancelled.
    pub fn finish_close(&self, key: DocumentKey, succeeded: bool) {
        let restored = self.publish("finish_close", |snap| {
            let Some(document) = snap.closing.remove(&key) else {
                return false;
            };
            if !succeeded {
                snap.insert(document);
            }
            return true;
        });
        if restored && !succeeded {
            warn!(target: "lazyref::registry", key = %key, "close did not complete; document re-registered");
        }
    }

    /// Apply one lifecycle notification.
    pub fn apply(&self, event: &DocumentEvent) {
        match event {
            DocumentEvent::Created(document) | DocumentEvent::Opened(document) => {
                self.register(Arc::clone(document));
            },
            DocumentEvent::Closing(document) => {
                self.begin_close(document.as_ref());
            },
            DocumentEvent::Closed { key, succeeded } => self.finish_close(*key, *succeeded),
        }
    }

    /// Resolve a fingerprint to its single open document.
    pub fn resolve(&self, fingerprint: Fingerprint) -> DocumentLookup {
        let snap = self.snap.load();
        let twins = snap.by_fingerprint.get(&fingerprint).cloned().unwrap_or_default();
        let lookup = DocumentLookup::from_matches(twins);
        if let DocumentLookup::Ambiguous { count } = lookup {
            debug!(target: "lazyref::registry", fingerprint = %fingerprint, count, "ambiguous fingerprint");
        }
        return lookup;
    }

    /// Resolve text a user typed: a path (anything with a separator) is
    /// matched against display paths, a file name (anything with an
    /// extension) against file names, and anything else against titles.
    /// Comparisons ignore ASCII case; only a unique match counts.
    pub fn find_by_text(&self, text: &str) -> DocumentLookup {
        let text = text.trim();
        let documents = self.documents();
        let matches = if text.contains(['/', '\\']) {
            documents
                .into_iter()
                .filter(|d| return d.identity().display_path.is_some_and(|p| return p.eq_ignore_ascii_case(text)))
                .collect()
        } else if Path::new(text).extension().is_some() {
            documents
                .into_iter()
                .filter(|d| return d.identity().file_name().is_some_and(|n| return n.eq_ignore_ascii_case(text)))
                .collect()
        } else {
            documents.into_iter().filter(|d| return d.title().eq_ignore_ascii_case(text)).collect()
        };
        return DocumentLookup::from_matches(matches);
    }

    /// Number of open instances sharing `fingerprint`.
    pub fn count(&self, fingerprint: Fingerprint) -> usize {
        return self.snap.load().by_fingerprint.get(&fingerprint).map_or(0, Vec::len);
    }

    /// Every registered instance, ordered by key.
    pub fn documents(&self) -> Vec<DocumentRef> {
        let snap = self.snap.load();
        let mut all: Vec<DocumentRef> = snap.by_fingerprint.values().flatten().cloned().collect();
        all.sort_by_key(|d| return d.key());
        return all;
    }

    /// Whether an instance is parked between closing and closed.
    pub fn is_closing(&self, key: DocumentKey) -> bool {
        return self.snap.load().closing.contains_key(&key);
    }

    /// Publication counter. Any change means cached resolutions may be stale.
    pub fn generation(&self) -> u64 {
        return self.snap.load().generation;
    }

    /// Forget everything. Called when the host application shuts down.
    pub fn clear(&self) {
        self.publish("clear", |snap| {
            let had_any = !snap.by_fingerprint.is_empty() || !snap.closing.is_empty();
            snap.by_fingerprint.clear();
            snap.closing.clear();
            return had_any;
        });
    }
}
