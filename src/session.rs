//! One host application session: the document registry and the type
//! registry, owned together and handed to whatever needs them.

use tracing::{debug, info};

use crate::classify::TypeRegistry;
use crate::error::Error;
use crate::handle::{ReferenceHandle, ResolutionState, ResolveContext};
use crate::host::{DocumentRef, LiveDocument, LiveDocumentProvider, LiveObjectStore, LiveRef};
use crate::link::{LinkContext, LiveBinding};
use crate::registry::{DocumentEvent, DocumentLookup, DocumentRegistry};
use crate::types::Identity;

/// Tally of a batch resolution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveSummary {
    /// Handles left ambiguous.
    pub ambiguous: usize,
    /// Handles whose object is gone.
    pub deleted: usize,
    /// Handles with malformed identities.
    pub invalid: usize,
    /// Handles bound to live objects.
    pub resolved: usize,
    /// Handles whose document (or linked document) is not available.
    pub unresolved: usize,
}

impl ResolveSummary {
    /// Count one handle.
    fn record(&mut self, state: ResolutionState) {
        let slot = match state {
            ResolutionState::Ambiguous => &mut self.ambiguous,
            ResolutionState::Deleted => &mut self.deleted,
            ResolutionState::Invalid => &mut self.invalid,
            ResolutionState::Resolved => &mut self.resolved,
            ResolutionState::Unresolved => &mut self.unresolved,
        };
        *slot = slot.saturating_add(1);
    }

    /// Whether anything is ambiguous, deleted or invalid.
    pub const fn has_broken(&self) -> bool {
        return self.ambiguous > 0 || self.deleted > 0 || self.invalid > 0;
    }
}

/// Registries for one host session. Created at host start-up, torn down with
/// [`Session::detach`] at shutdown.
#[derive(Debug, Default)]
pub struct Session {
    /// Open documents.
    documents: DocumentRegistry,
    /// Classification table.
    types: TypeRegistry,
}

impl Session {
    /// Session classifying with `types`.
    pub fn new(types: TypeRegistry) -> Self {
        return Self {
            documents: DocumentRegistry::new(),
            types,
        };
    }

    /// Register every document the host already has open. Returns how many.
    pub fn attach(&self, provider: &dyn LiveDocumentProvider) -> usize {
        let open = provider.open_documents();
        let count = open.len();
        for document in open {
            self.documents.register(document);
        }
        info!(target: "lazyref::session", documents = count, "session attached");
        return count;
    }

    /// Apply a host lifecycle notification.
    pub fn notify(&self, event: &DocumentEvent) {
        let (kind, key) = match event {
            DocumentEvent::Closed { key, .. } => ("closed", *key),
            DocumentEvent::Closing(document) => ("closing", document.key()),
            DocumentEvent::Created(document) => ("created", document.key()),
            DocumentEvent::Opened(document) => ("opened", document.key()),
        };
        debug!(target: "lazyref::session", kind, key = %key, "lifecycle event");
        self.documents.apply(event);
    }

    /// Apply several notifications in order.
    pub fn notify_all(&self, events: &[DocumentEvent]) {
        for event in events {
            self.notify(event);
        }
    }

    /// Forget every document. Handles resolved before this go stale.
    pub fn detach(&self) {
        self.documents.clear();
        info!(target: "lazyref::session", "session detached");
    }

    /// Open documents.
    pub const fn registry(&self) -> &DocumentRegistry {
        return &self.documents;
    }

    /// Classification table.
    pub const fn types(&self) -> &TypeRegistry {
        return &self.types;
    }

    /// What handles need to resolve against this session.
    pub fn context<'a>(&'a self, store: &'a dyn LiveObjectStore) -> ResolveContext<'a> {
        return ResolveContext {
            registry: &self.documents,
            store,
        };
    }

    /// Resolve a batch of handles and count the outcomes.
    pub fn resolve_all(&self, handles: &mut [ReferenceHandle], store: &dyn LiveObjectStore) -> ResolveSummary {
        let ctx = self.context(store);
        let mut summary = ResolveSummary::default();
        for handle in handles.iter_mut() {
            summary.record(handle.resolve(ctx));
        }
        return summary;
    }

    /// The unique open document matching user text (path, file name or title).
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDocument` when nothing or more than one document matches.
    pub fn find_document(&self, text: &str) -> Result<DocumentRef, Error> {
        let matches = match self.documents.find_by_text(text) {
            DocumentLookup::Ambiguous { count } => count,
            DocumentLookup::Found(document) => return Ok(document),
            DocumentLookup::NotOpen => 0,
        };
        return Err(Error::UnknownDocument {
            candidates: self.documents.documents().iter().map(|d| return d.title()).collect(),
            matches,
            reference: text.to_string(),
        });
    }

    /// Build and resolve a handle from text scoped to `document`: either a
    /// full identity of that document or a bare `id` / `host@linked`.
    /// The handle is classified when it resolves.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedIdentity` if the text doesn't parse or names
    /// another document.
    pub fn lookup(&self, document: &dyn LiveDocument, text: &str, store: &dyn LiveObjectStore) -> Result<ReferenceHandle, Error> {
        let identity = Identity::parse_lenient(text, document.identity().fingerprint)?;
        let mut handle = ReferenceHandle::from_identity(identity);
        handle.resolve(self.context(store));
        if let Some(object) = handle.live_value() {
            let subtype = self.types.classify(object.as_ref());
            handle = handle.with_subtype(subtype);
        }
        return Ok(handle);
    }

    /// Classified handles for every object in `document`, followed by the
    /// objects of every loaded linked document, reached through their link.
    pub fn enumerate(&self, document: &DocumentRef, store: &dyn LiveObjectStore) -> Vec<ReferenceHandle> {
        let mut handles = Vec::new();
        let mut linked = Vec::new();
        for object in store.objects(document.as_ref()) {
            let loaded = object.link_target().and_then(|target| {
                let placement = target.placement;
                return target.document.filter(|d| return d.is_open()).map(|nested| return (nested, placement));
            });
            if let Some((nested, placement)) = loaded {
                let context = LinkContext {
                    host_document: DocumentRef::clone(document),
                    link_instance: LiveRef::clone(&object),
                    placement,
                };
                linked.push((context, nested));
            }
            handles.push(self.types.wrap(LiveBinding::direct(DocumentRef::clone(document), object)));
        }
        for (context, nested) in linked {
            for object in store.objects(nested.as_ref()) {
                let binding = LiveBinding {
                    context: Some(context.clone()),
                    document: DocumentRef::clone(&nested),
                    object,
                };
                handles.push(self.types.wrap(binding));
            }
        }
        return handles;
    }
}
