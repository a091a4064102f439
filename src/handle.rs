//! The reference handle applications hold: a stored identity plus a lazily
//! resolved, cached, invalidatable live binding.
//!
//! A handle only resolves when asked to. Reading [`ReferenceHandle::live_value`]
//! never triggers a lookup, so every resolution attempt is visible at the call
//! site.

use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::debug;
use url::Url;

use crate::bindings::HandleRecord;
use crate::classify::HandleSubtype;
use crate::codec;
use crate::host::{DocumentRef, LiveObjectStore, LiveRef};
use crate::link::{self, ChainOutcome, Fetch, LiveBinding};
use crate::registry::{DocumentLookup, DocumentRegistry};
use crate::types::{DocumentIdentity, Fingerprint, Identity, PersistentId};

// ── States ────────────────────────────────────────────────────────────

/// Where a handle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionState {
    /// More than one open document shares the fingerprint.
    Ambiguous,
    /// The document is reachable but the object is gone.
    Deleted,
    /// The stored identity is malformed. Terminal.
    Invalid,
    /// Bound to a live object whose id matches the stored identity.
    Resolved,
    /// Never resolved, invalidated, or the document is not available yet.
    Unresolved,
}

impl ResolutionState {
    /// Prefix used by handle display.
    const fn prefix(self) -> &'static str {
        return match self {
            Self::Ambiguous => "⚠ Ambiguous ",
            Self::Deleted => "❌ Deleted ",
            Self::Invalid => "⚠ Invalid ",
            Self::Resolved => "",
            Self::Unresolved => "Unresolved ",
        };
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ambiguous => "ambiguous",
            Self::Deleted => "deleted",
            Self::Invalid => "invalid",
            Self::Resolved => "resolved",
            Self::Unresolved => "unresolved",
        };
        return f.write_str(text);
    }
}

/// Precise reason the last resolution attempt did not bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    /// Several open documents share the fingerprint.
    Ambiguous {
        /// How many.
        count: usize,
    },
    /// Document open, object not found.
    Deleted,
    /// No object with the host-side id of a chain.
    HostObjectMissing,
    /// The store answered with an object whose own id differs.
    IdentityMismatch {
        /// Id the returned object actually has.
        actual: PersistentId,
    },
    /// The host-side object of a chain is not a link instance.
    LinkInstanceMissing,
    /// The link instance exists but its nested document is not loaded.
    LinkedDocumentNotLoaded,
    /// The stored identity could not be decoded.
    Malformed {
        /// Decoder message.
        reason: String,
    },
    /// No open document has the fingerprint.
    NotOpen,
    /// The nested document is loaded but lacks the target.
    TargetMissing,
}

impl ResolveFailure {
    /// State a handle lands in after this failure.
    pub const fn state(&self) -> ResolutionState {
        return match self {
            Self::Ambiguous { .. } => ResolutionState::Ambiguous,
            Self::Deleted
            | Self::HostObjectMissing
            | Self::IdentityMismatch { .. }
            | Self::LinkInstanceMissing
            | Self::TargetMissing => ResolutionState::Deleted,
            Self::Malformed { .. } => ResolutionState::Invalid,
            Self::LinkedDocumentNotLoaded | Self::NotOpen => ResolutionState::Unresolved,
        };
    }
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            Self::Ambiguous { count } => write!(f, "{count} open documents share this fingerprint"),
            Self::Deleted => f.write_str("object no longer exists in its document"),
            Self::HostObjectMissing => f.write_str("link instance no longer exists"),
            Self::IdentityMismatch { actual } => write!(f, "object store returned `{actual}` instead"),
            Self::LinkInstanceMissing => f.write_str("host-side object is not a link instance"),
            Self::LinkedDocumentNotLoaded => f.write_str("linked document is not loaded"),
            Self::Malformed { reason } => write!(f, "malformed identity: {reason}"),
            Self::NotOpen => f.write_str("document is not open"),
            Self::TargetMissing => f.write_str("target no longer exists in the linked document"),
        };
    }
}

/// What a handle needs in order to resolve.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Open documents.
    pub registry: &'a DocumentRegistry,
    /// Object lookup.
    pub store: &'a dyn LiveObjectStore,
}

// ── Handle ────────────────────────────────────────────────────────────

/// What a handle was built from.
#[derive(Debug, Clone)]
enum Stored {
    /// Text that didn't decode.
    Malformed {
        /// The text as given.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A decoded identity.
    Valid {
        /// Start document, with metadata last seen for it.
        document: DocumentIdentity,
        /// The identity.
        identity: Identity,
    },
}

/// Lazy, serializable reference to one object in a host document.
///
/// Equality and hashing look at the stored identity only. Resolution state
/// and the cached binding never affect them.
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(from = "HandleRecord", into = "HandleRecord")]
pub struct ReferenceHandle {
    /// Cached binding; `Some` iff the state is `Resolved`.
    binding: Option<LiveBinding>,
    /// Registry generation the binding was validated against.
    generation: Option<u64>,
    /// Why the last attempt failed.
    last_failure: Option<ResolveFailure>,
    /// Object name seen at the last successful resolution.
    name: Option<String>,
    /// Current state.
    state: ResolutionState,
    /// The identity (or rejected text).
    stored: Stored,
    /// Specialized kind.
    subtype: HandleSubtype,
}

impl ReferenceHandle {
    /// Eager construction from a binding: identity captured now, already resolved.
    pub fn from_binding(binding: LiveBinding, subtype: HandleSubtype) -> Self {
        let target = binding.object.persistent_id();
        let (document, identity) = match &binding.context {
            Some(context) => {
                let document = context.host_document.identity();
                let identity = Identity::linked(document.fingerprint, context.link_instance.persistent_id(), target);
                (document, identity)
            },
            None => {
                let document = binding.document.identity();
                let identity = Identity::direct(document.fingerprint, target);
                (document, identity)
            },
        };
        let name = binding.object.name().map(str::to_string);
        debug!(target: "lazyref::handle", identity = %identity, subtype = %subtype, "handle bound eagerly");
        return Self {
            binding: Some(binding),
            generation: None,
            last_failure: None,
            name,
            state: ResolutionState::Resolved,
            stored: Stored::Valid { document, identity },
            subtype,
        };
    }

    /// Eager construction from an object found directly in `document`.
    pub fn from_live(document: DocumentRef, object: LiveRef) -> Self {
        return Self::from_binding(LiveBinding::direct(document, object), HandleSubtype::generic());
    }

    /// Lazy construction from a decoded identity.
    pub fn from_identity(identity: Identity) -> Self {
        let document = DocumentIdentity::bare(identity.fingerprint());
        return Self::lazy(Stored::Valid { document, identity });
    }

    /// Lazy construction from persisted text. Text that doesn't decode yields
    /// an `Invalid` handle rather than an error.
    pub fn parse(text: &str) -> Self {
        return match codec::decode(text) {
            Ok(identity) => Self::from_identity(identity),
            Err(e) => Self::malformed(text, e.to_string()),
        };
    }

    /// Invalid handle for rejected text.
    fn malformed(raw: &str, reason: String) -> Self {
        debug!(target: "lazyref::handle", raw, reason = %reason, "malformed identity");
        let mut handle = Self::lazy(Stored::Malformed {
            raw: raw.to_string(),
            reason: reason.clone(),
        });
        handle.state = ResolutionState::Invalid;
        handle.last_failure = Some(ResolveFailure::Malformed { reason });
        return handle;
    }

    /// Unresolved handle around `stored`.
    fn lazy(stored: Stored) -> Self {
        return Self {
            binding: None,
            generation: None,
            last_failure: None,
            name: None,
            state: ResolutionState::Unresolved,
            stored,
            subtype: HandleSubtype::generic(),
        };
    }

    /// Same handle with another subtype.
    #[must_use]
    pub fn with_subtype(mut self, subtype: HandleSubtype) -> Self {
        self.subtype = subtype;
        return self;
    }

    // ── Resolution ──

    /// Bring the handle up to date and report its state.
    ///
    /// A resolved handle whose binding is still live and whose registry
    /// generation is unchanged returns at once without any lookup. An eager
    /// handle keeps its binding on first use only if the registry still maps
    /// its fingerprint to that same document instance. Anything else except
    /// `Invalid` re-runs the full pipeline.
    pub fn resolve(&mut self, ctx: ResolveContext<'_>) -> ResolutionState {
        if self.state == ResolutionState::Invalid {
            return self.state;
        }

        let current = ctx.registry.generation();
        if self.state == ResolutionState::Resolved {
            let live = self.binding.as_ref().is_some_and(LiveBinding::is_live);
            match self.generation {
                Some(seen) if live && seen == current => return self.state,
                None if live && self.registry_agrees(ctx.registry) => {
                    self.generation = Some(current);
                    return self.state;
                },
                _ => {
                    debug!(target: "lazyref::handle", identity = %self.encoded(), "cached binding is stale");
                    self.binding = None;
                    self.state = ResolutionState::Unresolved;
                },
            }
        }

        let previous = self.state;
        match self.run(ctx) {
            Ok(binding) => {
                self.refresh_metadata(&binding);
                self.binding = Some(binding);
                self.generation = Some(current);
                self.last_failure = None;
                self.state = ResolutionState::Resolved;
            },
            Err(failure) => {
                self.binding = None;
                self.generation = None;
                self.state = failure.state();
                self.last_failure = Some(failure);
            },
        }
        if previous != self.state {
            debug!(
                target: "lazyref::handle",
                identity = %self.encoded(),
                from = %previous,
                to = %self.state,
                "handle state changed"
            );
        }
        return self.state;
    }

    /// Whether the registry maps the fingerprint to exactly the document the
    /// cached binding starts in.
    fn registry_agrees(&self, registry: &DocumentRegistry) -> bool {
        let (Some(binding), Stored::Valid { identity, .. }) = (&self.binding, &self.stored) else {
            return false;
        };
        return match registry.resolve(identity.fingerprint()) {
            DocumentLookup::Found(document) => document.key() == binding.start_document().key(),
            DocumentLookup::Ambiguous { .. } | DocumentLookup::NotOpen => false,
        };
    }

    /// The resolution pipeline: document lookup, then object or chain lookup.
    fn run(&self, ctx: ResolveContext<'_>) -> Result<LiveBinding, ResolveFailure> {
        let identity = match &self.stored {
            Stored::Malformed { reason, .. } => return Err(ResolveFailure::Malformed { reason: reason.clone() }),
            Stored::Valid { identity, .. } => identity,
        };

        let document = match ctx.registry.resolve(identity.fingerprint()) {
            DocumentLookup::Ambiguous { count } => return Err(ResolveFailure::Ambiguous { count }),
            DocumentLookup::Found(document) => document,
            DocumentLookup::NotOpen => return Err(ResolveFailure::NotOpen),
        };
        // Closed by the host, close events not delivered yet.
        if !document.is_open() {
            return Err(ResolveFailure::NotOpen);
        }

        return match identity {
            Identity::Direct(full) => match link::fetch_exact(ctx.store, document.as_ref(), &full.persistent_id) {
                Fetch::Found(object) => Ok(LiveBinding::direct(document, object)),
                Fetch::Mismatch(actual) => Err(ResolveFailure::IdentityMismatch { actual }),
                Fetch::Missing => Err(ResolveFailure::Deleted),
            },
            Identity::Linked { chain, .. } => match link::resolve_chain(ctx.store, &document, chain) {
                ChainOutcome::HostObjectMissing => Err(ResolveFailure::HostObjectMissing),
                ChainOutcome::LinkInstanceMissing => Err(ResolveFailure::LinkInstanceMissing),
                ChainOutcome::LinkedDocumentNotLoaded => Err(ResolveFailure::LinkedDocumentNotLoaded),
                ChainOutcome::Resolved(binding) => Ok(binding),
                ChainOutcome::TargetMissing => Err(ResolveFailure::TargetMissing),
            },
        };
    }

    /// Pick up the document's current path and URI and the object's name.
    fn refresh_metadata(&mut self, binding: &LiveBinding) {
        let fresh = match &binding.context {
            Some(context) => context.host_document.identity(),
            None => binding.document.identity(),
        };
        if let Stored::Valid { document, .. } = &mut self.stored {
            document.display_path = fresh.display_path.or_else(|| return document.display_path.take());
            document.model_uri = fresh.model_uri.or_else(|| return document.model_uri.take());
        }
        self.name = binding.object.name().map(str::to_string);
    }

    /// Drop the cached binding and go back to `Unresolved`. The object may
    /// still exist; the next [`ReferenceHandle::resolve`] finds out.
    /// `Invalid` handles stay invalid.
    pub fn invalidate(&mut self) {
        if self.state == ResolutionState::Invalid {
            return;
        }
        self.binding = None;
        self.generation = None;
        self.last_failure = None;
        if self.state != ResolutionState::Unresolved {
            debug!(target: "lazyref::handle", identity = %self.encoded(), from = %self.state, "handle invalidated");
        }
        self.state = ResolutionState::Unresolved;
    }

    // ── Accessors ──

    /// Current state, as of the last `resolve` or `invalidate`.
    pub const fn state(&self) -> ResolutionState {
        return self.state;
    }

    /// The cached live object. `None` unless resolved; never resolves.
    pub fn live_value(&self) -> Option<&LiveRef> {
        return self.binding.as_ref().map(|b| return &b.object);
    }

    /// The cached binding, including link context. `None` unless resolved.
    pub const fn binding(&self) -> Option<&LiveBinding> {
        return self.binding.as_ref();
    }

    /// Why the last attempt failed. `None` when resolved or not yet tried.
    pub const fn last_failure(&self) -> Option<&ResolveFailure> {
        return self.last_failure.as_ref();
    }

    /// One-line explanation for a handle that is not resolved.
    pub fn why_not(&self) -> Option<String> {
        return match self.state {
            ResolutionState::Resolved => None,
            ResolutionState::Unresolved if self.last_failure.is_none() => Some("not resolved yet".to_string()),
            _ => self.last_failure.as_ref().map(ToString::to_string),
        };
    }

    /// The decoded identity; `None` for invalid handles.
    pub const fn identity(&self) -> Option<&Identity> {
        return match &self.stored {
            Stored::Malformed { .. } => None,
            Stored::Valid { identity, .. } => Some(identity),
        };
    }

    /// Start document identity and last seen metadata; `None` for invalid handles.
    pub const fn document(&self) -> Option<&DocumentIdentity> {
        return match &self.stored {
            Stored::Malformed { .. } => None,
            Stored::Valid { document, .. } => Some(document),
        };
    }

    /// Specialized kind.
    pub const fn subtype(&self) -> &HandleSubtype {
        return &self.subtype;
    }

    /// Whether the handle reaches its object through a link.
    pub const fn is_linked(&self) -> bool {
        return match &self.stored {
            Stored::Malformed { .. } => false,
            Stored::Valid { identity, .. } => identity.is_linked(),
        };
    }

    /// Persisted text: the encoded identity, or the raw text if malformed.
    pub fn encoded(&self) -> String {
        return match &self.stored {
            Stored::Malformed { raw, .. } => raw.clone(),
            Stored::Valid { identity, .. } => codec::encode_identity(identity),
        };
    }

    // ── Persistence ──

    /// Record in the host's save format.
    pub fn to_record(&self) -> HandleRecord {
        let mut record = HandleRecord::bare(self.encoded());
        if !self.subtype.is_generic() {
            record.subtype = Some(self.subtype.name().to_string());
        }
        if let Stored::Valid { document, .. } = &self.stored {
            record.document_guid = Some(document.fingerprint.to_string());
            record.model_uri = document.model_uri.as_ref().map(Url::to_string);
            record.path_name.clone_from(&document.display_path);
        }
        return record;
    }

    /// Lazy handle from a saved record. A `DocumentGUID` that disagrees with
    /// the identity makes the handle invalid; a bad `ModelURI` is dropped.
    pub fn from_record(record: &HandleRecord) -> Self {
        let identity = match codec::decode(&record.identity) {
            Ok(identity) => identity,
            Err(e) => return Self::malformed(&record.identity, e.to_string()),
        };
        if let Some(guid) = &record.document_guid {
            let agrees = Fingerprint::parse(guid).is_ok_and(|fp| return fp == identity.fingerprint());
            if !agrees {
                return Self::malformed(&record.identity, format!("DocumentGUID `{guid}` does not match the identity"));
            }
        }

        let model_uri = record.model_uri.as_deref().and_then(|text| {
            return Url::parse(text)
                .inspect_err(|e| {
                    debug!(target: "lazyref::handle", uri = text, error = %e, "ignoring bad ModelURI");
                })
                .ok();
        });
        let document = DocumentIdentity {
            display_path: record.path_name.clone(),
            fingerprint: identity.fingerprint(),
            model_uri,
        };
        let handle = Self::lazy(Stored::Valid { document, identity });
        return match &record.subtype {
            Some(subtype) => handle.with_subtype(HandleSubtype::new(subtype.as_str())),
            None => handle,
        };
    }

    /// Short document label for display.
    fn document_label(&self) -> String {
        let Stored::Valid { document, .. } = &self.stored else {
            return "?".to_string();
        };
        if let Some(name) = document.file_name() {
            return name.to_string();
        }
        if let Some(binding) = &self.binding {
            return match &binding.context {
                Some(context) => context.host_document.title(),
                None => binding.document.title(),
            };
        }
        return document.fingerprint.to_string();
    }
}

impl PartialEq for ReferenceHandle {
    fn eq(&self, other: &Self) -> bool {
        return match (&self.stored, &other.stored) {
            (Stored::Valid { identity: a, .. }, Stored::Valid { identity: b, .. }) => a == b,
            (Stored::Malformed { raw: a, .. }, Stored::Malformed { raw: b, .. }) => a == b,
            (Stored::Malformed { .. }, Stored::Valid { .. }) | (Stored::Valid { .. }, Stored::Malformed { .. }) => false,
        };
    }
}

impl Eq for ReferenceHandle {}

impl Hash for ReferenceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.stored {
            Stored::Malformed { raw, .. } => raw.hash(state),
            Stored::Valid { identity, .. } => identity.hash(state),
        }
    }
}

impl fmt::Display for ReferenceHandle {
    /// `[status ][Linked ]<Subtype>[ : <name>] : <id> @ <document>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state.prefix())?;
        if self.is_linked() {
            f.write_str("Linked ")?;
        }
        write!(f, "{}", self.subtype)?;
        if let Some(name) = &self.name {
            write!(f, " : {name}")?;
        }
        let id = match &self.stored {
            Stored::Malformed { raw, .. } => raw.clone(),
            Stored::Valid { identity, .. } => identity.target_id().to_string(),
        };
        return write!(f, " : {id} @ {}", self.document_label());
    }
}

impl From<HandleRecord> for ReferenceHandle {
    fn from(record: HandleRecord) -> Self {
        return Self::from_record(&record);
    }
}

impl From<ReferenceHandle> for HandleRecord {
    fn from(handle: ReferenceHandle) -> Self {
        return handle.to_record();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::memory::{LinkSpec, MemoryDocument, MemoryHost, ObjectSpec};
    use crate::registry::DocumentEvent;

    const FP: &str = "3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b";
    const SITE_FP: &str = "11111111-2222-4333-8444-555555555555";

    struct Fixture {
        host: MemoryHost,
        registry: DocumentRegistry,
        tower: Arc<MemoryDocument>,
    }

    impl Fixture {
        fn new() -> Self {
            let host = MemoryHost::new();
            let tower = host.open_document(FP, "Tower", Some("C:\\models\\Tower.rvt")).unwrap();
            host.insert_object(tower.key(), &wall("A1B2-3-7"), None).unwrap();
            let registry = DocumentRegistry::new();
            for event in host.drain_events() {
                registry.apply(&event);
            }
            return Self { host, registry, tower };
        }

        fn ctx(&self) -> ResolveContext<'_> {
            return ResolveContext {
                registry: &self.registry,
                store: &self.host,
            };
        }

        fn pump(&self) {
            for event in self.host.drain_events() {
                self.registry.apply(&event);
            }
        }
    }

    fn wall(id: &str) -> ObjectSpec {
        return ObjectSpec {
            id: id.to_string(),
            name: Some("Basic Wall".to_string()),
            types: vec!["Wall".to_string(), "Element".to_string()],
            ..ObjectSpec::default()
        };
    }

    fn text(id: &str) -> String {
        return format!("{FP}:{id}");
    }

    /// Link `L1` in Tower pointing at a loaded `Site` that holds `X`.
    fn add_link(fx: &Fixture) {
        let site = fx.host.load_linked_document(SITE_FP, "Site").unwrap();
        fx.host.insert_object(site.key(), &wall("X"), None).unwrap();
        let link = ObjectSpec {
            id: "L1".to_string(),
            link: Some(LinkSpec::default()),
            types: vec!["LinkInstance".to_string()],
            ..ObjectSpec::default()
        };
        fx.host.insert_object(fx.tower.key(), &link, Some(site.key())).unwrap();
    }

    #[test]
    fn lazy_handle_starts_unresolved_and_resolves() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        assert_eq!(handle.state(), ResolutionState::Unresolved);
        assert!(handle.live_value().is_none(), "lazy handle has a live value");

        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
        let live = handle.live_value().unwrap();
        assert_eq!(live.persistent_id(), PersistentId::new("A1B2-3-7").unwrap());
    }

    #[test]
    fn resolution_refreshes_document_metadata() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        handle.resolve(fx.ctx());
        assert_eq!(handle.document().unwrap().display_path.as_deref(), Some("C:\\models\\Tower.rvt"));
        assert_eq!(handle.to_string(), "Element : Basic Wall : A1B2-3-7 @ Tower.rvt");
    }

    #[test]
    fn resolve_is_idempotent_while_nothing_changes() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        handle.resolve(fx.ctx());
        let first = Arc::clone(handle.live_value().unwrap());
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
        assert!(Arc::ptr_eq(&first, handle.live_value().unwrap()), "cached object replaced");
    }

    #[test]
    fn second_document_makes_resolved_handle_ambiguous() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);

        let twin = fx.host.open_document(FP, "Tower copy", None).unwrap();
        fx.pump();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Ambiguous);
        assert_eq!(handle.last_failure(), Some(&ResolveFailure::Ambiguous { count: 2 }));
        assert!(handle.live_value().is_none(), "ambiguous handle kept its binding");
        assert!(handle.to_string().starts_with("⚠ Ambiguous "), "display: {handle}");

        fx.host.close_document(twin.key(), true);
        fx.pump();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
    }

    #[test]
    fn equality_ignores_resolution_state() {
        let fx = Fixture::new();
        let mut resolved = ReferenceHandle::parse(&text("A1B2-3-7"));
        resolved.resolve(fx.ctx());
        let lazy = ReferenceHandle::parse(&text("A1B2-3-7"));
        assert_eq!(resolved, lazy);

        let set: HashSet<ReferenceHandle> = [resolved, lazy].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn invalidate_clears_cache_until_next_resolve() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        handle.resolve(fx.ctx());
        handle.invalidate();
        assert_eq!(handle.state(), ResolutionState::Unresolved);
        assert!(handle.live_value().is_none(), "invalidated handle kept its binding");

        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
        assert!(handle.live_value().is_some(), "re-resolve did not repopulate");
    }

    #[test]
    fn missing_object_in_open_document_is_deleted() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("gone"));
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Deleted);
        assert_eq!(handle.last_failure(), Some(&ResolveFailure::Deleted));
        assert!(handle.to_string().starts_with("❌ Deleted "), "display: {handle}");
    }

    #[test]
    fn closed_document_is_not_open_rather_than_deleted() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        handle.resolve(fx.ctx());

        fx.host.close_document(fx.tower.key(), true);
        fx.pump();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Unresolved);
        assert_eq!(handle.last_failure(), Some(&ResolveFailure::NotOpen));
    }

    #[test]
    fn undo_recreating_object_resolves_again() {
        let fx = Fixture::new();
        let id = PersistentId::new("A1B2-3-7").unwrap();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        handle.resolve(fx.ctx());

        assert!(fx.host.remove_object(fx.tower.key(), &id), "object not removed");
        handle.invalidate();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Deleted);

        fx.host.insert_object(fx.tower.key(), &wall("A1B2-3-7"), None).unwrap();
        handle.invalidate();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
    }

    #[test]
    fn malformed_text_is_terminally_invalid() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse("not an identity");
        assert_eq!(handle.state(), ResolutionState::Invalid);
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Invalid);
        handle.invalidate();
        assert_eq!(handle.state(), ResolutionState::Invalid);
        assert!(handle.why_not().unwrap().starts_with("malformed identity"), "why_not: {:?}", handle.why_not());
        assert_eq!(handle.encoded(), "not an identity");
    }

    #[test]
    fn eager_handle_is_resolved_immediately() {
        let fx = Fixture::new();
        let object = fx.host.find(&*fx.tower, &PersistentId::new("A1B2-3-7").unwrap()).unwrap();
        let mut handle = ReferenceHandle::from_live(fx.tower.document_ref(), object);
        assert_eq!(handle.state(), ResolutionState::Resolved);
        assert_eq!(handle.encoded(), text("A1B2-3-7"));
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
        assert_eq!(handle, ReferenceHandle::parse(&text("A1B2-3-7")));
    }

    #[test]
    fn eager_handle_sees_twin_opened_after_it_was_built() {
        let fx = Fixture::new();
        let object = fx.host.find(&*fx.tower, &PersistentId::new("A1B2-3-7").unwrap()).unwrap();
        let mut handle = ReferenceHandle::from_live(fx.tower.document_ref(), object);

        fx.host.open_document(FP, "Tower copy", None).unwrap();
        fx.pump();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Ambiguous);
        assert!(handle.live_value().is_none(), "ambiguous handle kept its binding");
    }

    #[test]
    fn eager_handle_sees_closing_event() {
        let fx = Fixture::new();
        let object = fx.host.find(&*fx.tower, &PersistentId::new("A1B2-3-7").unwrap()).unwrap();
        let mut handle = ReferenceHandle::from_live(fx.tower.document_ref(), object);

        fx.registry.apply(&DocumentEvent::Closing(fx.tower.document_ref()));
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Unresolved);
        assert_eq!(handle.last_failure(), Some(&ResolveFailure::NotOpen));
    }

    #[test]
    fn host_closed_before_events_arrive_is_not_open() {
        let fx = Fixture::new();
        add_link(&fx);
        let mut direct = ReferenceHandle::parse(&text("A1B2-3-7"));
        let mut linked = ReferenceHandle::parse(&format!("{FP}:L1@X"));

        fx.host.close_document(fx.tower.key(), true);
        assert_eq!(direct.resolve(fx.ctx()), ResolutionState::Unresolved);
        assert_eq!(direct.last_failure(), Some(&ResolveFailure::NotOpen));
        assert_eq!(linked.resolve(fx.ctx()), ResolutionState::Unresolved);
        assert_eq!(linked.last_failure(), Some(&ResolveFailure::NotOpen));
    }

    #[test]
    fn chain_failures_name_the_missing_hop() {
        let fx = Fixture::new();
        add_link(&fx);

        let mut missing = ReferenceHandle::parse(&format!("{FP}:L404@X"));
        assert_eq!(missing.resolve(fx.ctx()), ResolutionState::Deleted);
        assert_eq!(missing.last_failure(), Some(&ResolveFailure::HostObjectMissing));

        let mut not_a_link = ReferenceHandle::parse(&format!("{FP}:A1B2-3-7@X"));
        assert_eq!(not_a_link.resolve(fx.ctx()), ResolutionState::Deleted);
        assert_eq!(not_a_link.last_failure(), Some(&ResolveFailure::LinkInstanceMissing));
    }

    #[test]
    fn closing_document_drops_cached_binding() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        handle.resolve(fx.ctx());
        fx.registry.apply(&DocumentEvent::Closing(fx.tower.document_ref()));
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Unresolved);

        fx.registry.apply(&DocumentEvent::Closed { key: fx.tower.key(), succeeded: false });
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
    }

    #[test]
    fn linked_handle_resolves_and_reports_unloaded_link() {
        let fx = Fixture::new();
        add_link(&fx);

        let mut handle = ReferenceHandle::parse(&format!("{FP}:L1@X"));
        assert!(handle.is_linked(), "chain not recognized");
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Resolved);
        assert!(handle.binding().unwrap().context.is_some(), "link context missing");
        assert!(handle.to_string().starts_with("Linked Element"), "display: {handle}");

        fx.host.set_link_document(fx.tower.key(), &PersistentId::new("L1").unwrap(), None);
        handle.invalidate();
        assert_eq!(handle.resolve(fx.ctx()), ResolutionState::Unresolved);
        assert_eq!(handle.last_failure(), Some(&ResolveFailure::LinkedDocumentNotLoaded));
    }

    #[test]
    fn record_round_trip_keeps_metadata() {
        let fx = Fixture::new();
        let mut handle = ReferenceHandle::parse(&text("A1B2-3-7")).with_subtype(HandleSubtype::new("Wall"));
        handle.resolve(fx.ctx());
        let record = handle.to_record();
        assert_eq!(record.document_guid.as_deref(), Some(FP));
        assert_eq!(record.path_name.as_deref(), Some("C:\\models\\Tower.rvt"));
        assert_eq!(record.subtype.as_deref(), Some("Wall"));

        let restored = ReferenceHandle::from_record(&record);
        assert_eq!(restored, handle);
        assert_eq!(restored.state(), ResolutionState::Unresolved);
        assert_eq!(restored.subtype().name(), "Wall");
    }

    #[test]
    fn record_with_conflicting_guid_is_invalid() {
        let mut record = HandleRecord::bare(text("A1B2-3-7"));
        record.document_guid = Some(SITE_FP.to_string());
        let handle = ReferenceHandle::from_record(&record);
        assert_eq!(handle.state(), ResolutionState::Invalid);
    }

    #[test]
    fn serde_goes_through_the_record() {
        let handle = ReferenceHandle::parse(&text("A1B2-3-7"));
        let json = serde_json::to_string(&handle).unwrap();
        assert!(json.contains("\"Identity\""), "record field missing: {json}");
        let back: ReferenceHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);

        let broken: ReferenceHandle = serde_json::from_str(r#"{"Identity":"nope"}"#).unwrap();
        assert_eq!(broken.state(), ResolutionState::Invalid);
    }
}
