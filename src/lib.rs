//! Lazy, persistent references into externally owned CAD document models.
//!
//! A [`handle::ReferenceHandle`] stores the identity of one object inside one
//! logical document and re-acquires a live pointer to it on demand, through
//! the [`registry::DocumentRegistry`] of open documents and, for objects in
//! nested documents, a single hop through a link instance. Every way that
//! can fail is a reported state, never a panic.
//!
//! The host application is reached only through the traits in [`host`];
//! [`memory`] is a complete in-process host used by the CLI and tests.

pub mod bindings;
pub mod classify;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod host;
pub mod link;
pub mod memory;
pub mod registry;
pub mod session;
pub mod types;
