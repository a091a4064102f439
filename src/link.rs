//! Two-hop resolution through a link instance into a nested document.
//!
//! The resolver never loads anything. A link whose nested document is not in
//! memory is reported as such and left for the caller to deal with.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::host::{DocumentRef, LiveDocument, LiveObjectStore, LiveRef, Placement};
use crate::types::{LinkChain, PersistentId};

/// Where a linked object sits relative to the document the reference starts in.
/// Carried through untouched for geometry code downstream.
#[derive(Debug, Clone)]
pub struct LinkContext {
    /// Document holding the link instance.
    pub host_document: DocumentRef,
    /// The link instance itself.
    pub link_instance: LiveRef,
    /// Placement of the nested document inside the host.
    pub placement: Placement,
}

/// A live object together with the document instance it was found in.
#[derive(Debug, Clone)]
pub struct LiveBinding {
    /// Present iff the object was reached through a link.
    pub context: Option<LinkContext>,
    /// Document instance owning `object` (the nested one for linked objects).
    pub document: DocumentRef,
    /// The object.
    pub object: LiveRef,
}

impl LiveBinding {
    /// A binding for an object found directly in `document`.
    pub const fn direct(document: DocumentRef, object: LiveRef) -> Self {
        return Self {
            context: None,
            document,
            object,
        };
    }

    /// Whether every document the binding passes through is still open.
    pub fn is_live(&self) -> bool {
        let host_open = self.context.as_ref().is_none_or(|c| return c.host_document.is_open());
        return host_open && self.document.is_open();
    }

    /// The document the reference starts in: the host for linked objects.
    pub fn start_document(&self) -> &DocumentRef {
        return self.context.as_ref().map_or(&self.document, |c| return &c.host_document);
    }
}

/// Outcome of walking a [`LinkChain`].
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// No object with the host-side id in the host document.
    HostObjectMissing,
    /// The host-side object exists but is not a link instance.
    LinkInstanceMissing,
    /// The link instance exists but its nested document is not in memory.
    LinkedDocumentNotLoaded,
    /// Both hops succeeded.
    Resolved(LiveBinding),
    /// The nested document is loaded but has no object with the linked id.
    TargetMissing,
}

impl fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::HostObjectMissing => "host-side object not found in host document",
            Self::LinkInstanceMissing => "host-side object is not a link instance",
            Self::LinkedDocumentNotLoaded => "linked document is not loaded",
            Self::Resolved(_) => "resolved",
            Self::TargetMissing => "target not found in linked document",
        };
        return f.write_str(text);
    }
}

/// Result of [`fetch_exact`].
#[derive(Debug)]
pub(crate) enum Fetch {
    /// Found, and its id matches.
    Found(LiveRef),
    /// Found, but it re-derives to this other id.
    Mismatch(PersistentId),
    /// Not found.
    Missing,
}

/// Look an object up and refuse it if its own id disagrees with the one asked for.
pub(crate) fn fetch_exact(store: &dyn LiveObjectStore, document: &dyn LiveDocument, id: &PersistentId) -> Fetch {
    let Some(object) = store.find(document, id) else {
        return Fetch::Missing;
    };
    let actual = object.persistent_id();
    if actual != *id {
        warn!(
            target: "lazyref::link",
            expected = %id,
            actual = %actual,
            document = %document.key(),
            "object store returned an object with a different id"
        );
        return Fetch::Mismatch(actual);
    }
    return Fetch::Found(object);
}

/// Walk `chain` starting at `host`.
pub fn resolve_chain(store: &dyn LiveObjectStore, host: &DocumentRef, chain: &LinkChain) -> ChainOutcome {
    let link_instance = match fetch_exact(store, host.as_ref(), &chain.host) {
        Fetch::Found(object) => object,
        Fetch::Mismatch(_) | Fetch::Missing => return ChainOutcome::HostObjectMissing,
    };
    let Some(target) = link_instance.link_target() else {
        debug!(target: "lazyref::link", id = %chain.host, "host-side object is not a link instance");
        return ChainOutcome::LinkInstanceMissing;
    };
    let Some(nested) = target.document.filter(|d| return d.is_open()) else {
        debug!(target: "lazyref::link", link = %chain.host, "linked document not loaded");
        return ChainOutcome::LinkedDocumentNotLoaded;
    };

    let object = match fetch_exact(store, nested.as_ref(), &chain.linked) {
        Fetch::Found(object) => object,
        Fetch::Mismatch(_) | Fetch::Missing => return ChainOutcome::TargetMissing,
    };
    return ChainOutcome::Resolved(LiveBinding {
        context: Some(LinkContext {
            host_document: Arc::clone(host),
            link_instance,
            placement: target.placement,
        }),
        document: nested,
        object,
    });
}
