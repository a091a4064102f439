//! CLI commands for lazyref: encode, decode, init, check, list, find.

use std::path::Path;
use std::process::ExitCode;

use lazyref::bindings::BindingsFile;
use lazyref::codec;
use lazyref::config::Config;
use lazyref::diagnostics;
use lazyref::error::Error;
use lazyref::handle::{ReferenceHandle, ResolutionState};
use lazyref::memory::MemoryHost;
use lazyref::session::Session;
use lazyref::types::{DocumentIdentity, Fingerprint, Identity, PersistentId};

/// Some handles could not be resolved yet.
const EXIT_UNRESOLVED: u8 = 1;
/// Some handles are ambiguous, deleted or invalid.
const EXIT_BROKEN: u8 = 2;

/// Paths a command works on after CLI overrides.
#[derive(Debug)]
pub struct Paths<'a> {
    /// Bindings file override.
    pub bindings: Option<&'a Path>,
    /// Model snapshot override.
    pub model: Option<&'a Path>,
}

/// Load the snapshot and attach a session classifying with the configured rules.
///
/// # Errors
///
/// Returns errors from snapshot loading or rule validation.
fn open_session(config: &Config, paths: &Paths<'_>) -> Result<(MemoryHost, Session), Error> {
    let host = MemoryHost::load(paths.model.unwrap_or_else(|| return config.model()))?;
    let session = Session::new(config.type_registry()?);
    session.attach(&host);
    // Opened events were already covered by attach.
    host.drain_events();
    return Ok((host, session));
}

/// Print the identity string for a fingerprint and id (or link chain).
///
/// # Errors
///
/// Returns `Error::MalformedIdentity` if any component is invalid.
pub fn encode(fingerprint: &str, id: &str, linked: Option<&str>) -> Result<ExitCode, Error> {
    let text = match linked {
        Some(linked) => {
            let document = DocumentIdentity::bare(Fingerprint::parse(fingerprint)?);
            codec::encode_link(&document, &PersistentId::new(id)?, &PersistentId::new(linked)?)
        },
        None => codec::encode_parts(fingerprint, id)?,
    };
    println!("{text}");
    return Ok(ExitCode::SUCCESS);
}

/// Print the components of an identity string.
///
/// # Errors
///
/// Returns `Error::MalformedIdentity` if the text does not decode.
pub fn decode(text: &str) -> Result<ExitCode, Error> {
    let identity = codec::decode(text)?;
    println!("fingerprint: {}", identity.fingerprint());
    match &identity {
        Identity::Direct(full) => print_id("id", &full.persistent_id),
        Identity::Linked { chain, .. } => {
            print_id("link", &chain.host);
            print_id("target", &chain.linked);
        },
    }
    return Ok(ExitCode::SUCCESS);
}

/// One `label: id` line, plus episode details when the id has them.
fn print_id(label: &str, id: &PersistentId) {
    match id.parts() {
        Some((episode, counter)) => {
            let origin = if id.is_built_in() { "built-in" } else { "user" };
            println!("{label}: {id} (episode {episode}, counter {counter}, {origin})");
        },
        None => println!("{label}: {id}"),
    }
}

/// Enumerate every open document and save a handle for each object.
///
/// # Errors
///
/// Returns errors from snapshot loading, rule validation, or writing the bindings file.
pub fn init(config: &Config, paths: &Paths<'_>) -> Result<ExitCode, Error> {
    let (host, session) = open_session(config, paths)?;

    let mut records = Vec::new();
    for document in session.registry().documents() {
        records.extend(session.enumerate(&document, &host).iter().map(ReferenceHandle::to_record));
    }
    let bindings = BindingsFile::new(records);
    let path = paths.bindings.unwrap_or_else(|| return config.bindings());
    bindings.write(path)?;
    println!("Wrote {} handles to {}", bindings.records.len(), path.display());
    return Ok(ExitCode::SUCCESS);
}

/// Resolve every saved handle and report its status.
///
/// # Errors
///
/// Returns errors from snapshot loading, rule validation, or reading the bindings file.
pub fn check(config: &Config, paths: &Paths<'_>) -> Result<ExitCode, Error> {
    let (host, session) = open_session(config, paths)?;
    let bindings = BindingsFile::read(paths.bindings.unwrap_or_else(|| return config.bindings()))?;

    let mut handles: Vec<ReferenceHandle> = bindings.records.iter().map(ReferenceHandle::from_record).collect();
    let summary = session.resolve_all(&mut handles, &host);
    for handle in &handles {
        if handle.state() != ResolutionState::Resolved {
            println!("{}", diagnostics::render_status_line(handle));
        }
    }

    let total = handles.len();
    // Exit code priority: broken (2) > unresolved (1) > all resolved (0).
    if summary.has_broken() {
        println!();
        println!(
            "{} ambiguous, {} deleted, {} invalid, {} unresolved of {total}",
            summary.ambiguous, summary.deleted, summary.invalid, summary.unresolved
        );
        return Ok(ExitCode::from(EXIT_BROKEN));
    } else if summary.unresolved > 0 {
        println!();
        println!("{} unresolved of {total}", summary.unresolved);
        return Ok(ExitCode::from(EXIT_UNRESOLVED));
    } else {
        println!("All {total} handles resolved");
        return Ok(ExitCode::SUCCESS);
    }
}

/// Print every open document and its classified objects.
///
/// # Errors
///
/// Returns errors from snapshot loading or rule validation.
pub fn list(config: &Config, paths: &Paths<'_>) -> Result<ExitCode, Error> {
    let (host, session) = open_session(config, paths)?;

    for document in session.registry().documents() {
        let identity = document.identity();
        let location = identity.display_path.as_deref().unwrap_or("(unsaved)");
        println!("{} {} {location}", document.title(), identity.fingerprint);
        for handle in session.enumerate(&document, &host) {
            println!("  {:<18} {}", handle.subtype().name(), handle.encoded());
        }
    }
    return Ok(ExitCode::SUCCESS);
}

/// Find a document by user text and, optionally, an object inside it.
///
/// # Errors
///
/// Returns `Error::UnknownDocument` if no unique document matches, or
/// `Error::MalformedIdentity` if the object text doesn't parse.
pub fn find(config: &Config, paths: &Paths<'_>, document: &str, id: Option<&str>) -> Result<ExitCode, Error> {
    let (host, session) = open_session(config, paths)?;
    let found = session.find_document(document)?;
    let identity = found.identity();
    println!("{} {}", found.title(), identity.fingerprint);

    let Some(id) = id else {
        return Ok(ExitCode::SUCCESS);
    };
    let handle = session.lookup(found.as_ref(), id, &host)?;
    println!("{}", diagnostics::render_status_line(&handle));
    let code = match handle.state() {
        ResolutionState::Resolved => ExitCode::SUCCESS,
        ResolutionState::Unresolved => ExitCode::from(EXIT_UNRESOLVED),
        ResolutionState::Ambiguous | ResolutionState::Deleted | ResolutionState::Invalid => ExitCode::from(EXIT_BROKEN),
    };
    return Ok(code);
}
