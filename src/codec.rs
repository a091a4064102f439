//! Persisted identity text: `<fingerprint>:<id>` and `<fingerprint>:<host>@<linked>`.
//!
//! The format is bit-exact because other tooling parses it. Decoding never
//! guesses: anything ambiguous or truncated is rejected.

use crate::error::Error;
use crate::types::{DocumentIdentity, Fingerprint, Identity, PersistentId};

/// Separates the document fingerprint from the persistent id.
pub const ID_DELIMITER: char = ':';

/// Separates the link instance id from the linked target id.
pub const LINK_DELIMITER: char = '@';

/// Whether `c` may not appear inside a persistent id.
pub const fn is_reserved(c: char) -> bool {
    return c == ID_DELIMITER || c == LINK_DELIMITER;
}

/// Encode a direct reference to `id` inside `document`.
pub fn encode(document: &DocumentIdentity, id: &PersistentId) -> String {
    return format!("{}{ID_DELIMITER}{id}", document.fingerprint);
}

/// Encode a reference to `linked` reached through link instance `host`.
pub fn encode_link(document: &DocumentIdentity, host: &PersistentId, linked: &PersistentId) -> String {
    return format!("{}{ID_DELIMITER}{host}{LINK_DELIMITER}{linked}", document.fingerprint);
}

/// Encode any identity.
pub fn encode_identity(identity: &Identity) -> String {
    return match identity {
        Identity::Direct(full) => format!("{}{ID_DELIMITER}{}", full.fingerprint, full.persistent_id),
        Identity::Linked { chain, fingerprint } => {
            format!("{fingerprint}{ID_DELIMITER}{}{LINK_DELIMITER}{}", chain.host, chain.linked)
        },
    };
}

/// Encode from untrusted component text.
///
/// # Errors
///
/// Returns `Error::MalformedIdentity` if the fingerprint is not a canonical
/// GUID or the id is empty or already contains a reserved delimiter.
pub fn encode_parts(fingerprint: &str, id: &str) -> Result<String, Error> {
    let fingerprint = Fingerprint::parse(fingerprint)?;
    let id = PersistentId::new(id)?;
    return Ok(encode(&DocumentIdentity::bare(fingerprint), &id));
}

/// Decode a persisted identity string.
///
/// # Errors
///
/// Returns `Error::MalformedIdentity` when the text has no delimiter, more
/// than one of either delimiter, an empty component, or a fingerprint that
/// is not a canonical non-nil GUID.
pub fn decode(text: &str) -> Result<Identity, Error> {
    let Some((fingerprint, rest)) = text.split_once(ID_DELIMITER) else {
        return Err(Error::malformed(text, "missing `:` delimiter"));
    };
    if rest.contains(ID_DELIMITER) {
        return Err(Error::malformed(text, "more than one `:` delimiter"));
    }
    let fingerprint = Fingerprint::parse(fingerprint)?;

    let Some((host, linked)) = rest.split_once(LINK_DELIMITER) else {
        let id = PersistentId::new(rest).map_err(|_err| return Error::malformed(text, "empty persistent id"))?;
        return Ok(Identity::direct(fingerprint, id));
    };
    if linked.contains(LINK_DELIMITER) {
        return Err(Error::malformed(text, "more than one `@` delimiter"));
    }
    if host.is_empty() || linked.is_empty() {
        return Err(Error::malformed(text, "truncated link chain"));
    }

    let host = PersistentId::new(host)?;
    let linked = PersistentId::new(linked)?;
    return Ok(Identity::linked(fingerprint, host, linked));
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const FP: &str = "3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b";

    fn fp() -> Fingerprint {
        return Fingerprint::parse(FP).unwrap();
    }

    #[test]
    fn decodes_direct_reference() {
        let text = format!("{FP}:A1B2-3-7");
        let identity = decode(&text).unwrap();
        assert_eq!(identity, Identity::direct(fp(), PersistentId::new("A1B2-3-7").unwrap()));
        assert_eq!(encode_identity(&identity), text);
    }

    #[test]
    fn decodes_link_chain() {
        let text = format!("{FP}:link-4@wall-12");
        let identity = decode(&text).unwrap();
        let Identity::Linked { chain, fingerprint } = &identity else {
            panic!("expected a link chain, got {identity:?}");
        };
        assert_eq!(*fingerprint, fp());
        assert_eq!(chain.host.as_str(), "link-4");
        assert_eq!(chain.linked.as_str(), "wall-12");
        assert_eq!(identity.to_string(), text);
    }

    #[test]
    fn rejects_missing_delimiter() {
        assert!(decode(FP).is_err(), "bare fingerprint accepted");
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(decode(&format!("{FP}:")).is_err(), "empty id accepted");
        assert!(decode(&format!("{FP}:host@")).is_err(), "empty linked id accepted");
        assert!(decode(&format!("{FP}:@target")).is_err(), "empty host id accepted");
        assert!(decode(":A1B2").is_err(), "empty fingerprint accepted");
    }

    #[test]
    fn rejects_ambiguous_input() {
        assert!(decode(&format!("{FP}:a:b")).is_err(), "second colon accepted");
        assert!(decode(&format!("{FP}:a@b@c")).is_err(), "two-hop chain accepted");
    }

    #[test]
    fn encode_parts_rejects_reserved_delimiters() {
        assert!(encode_parts(FP, "x:y").is_err(), "colon inside id accepted");
        assert!(encode_parts(FP, "x@y").is_err(), "at sign inside id accepted");
        assert!(encode_parts("not-a-guid", "x").is_err(), "bad fingerprint accepted");
        assert_eq!(encode_parts(FP, "x").unwrap(), format!("{FP}:x"));
    }

    #[test]
    fn typed_encoders_agree_with_identity_encoder() {
        let doc = DocumentIdentity::bare(fp());
        let host = PersistentId::new("L1").unwrap();
        let linked = PersistentId::new("T9").unwrap();
        let identity = Identity::linked(fp(), host.clone(), linked.clone());
        assert_eq!(encode_link(&doc, &host, &linked), encode_identity(&identity));
        assert_eq!(encode(&doc, &linked), format!("{FP}:T9"));
    }

    fn persistent_id() -> impl Strategy<Value = PersistentId> {
        return "[A-Za-z0-9_.\\-]{1,40}".prop_map(|s| return PersistentId::new(s).unwrap());
    }

    fn fingerprint() -> impl Strategy<Value = Fingerprint> {
        return any::<u128>()
            .prop_filter("nil is not a fingerprint", |bits| return *bits != 0)
            .prop_map(|bits| return Fingerprint::new(uuid::Uuid::from_u128(bits)).unwrap());
    }

    proptest! {
        #[test]
        fn direct_round_trip(fp in fingerprint(), id in persistent_id()) {
            let text = encode(&DocumentIdentity::bare(fp), &id);
            prop_assert_eq!(decode(&text).unwrap(), Identity::direct(fp, id));
        }

        #[test]
        fn link_round_trip(fp in fingerprint(), host in persistent_id(), linked in persistent_id()) {
            let identity = Identity::linked(fp, host, linked);
            let text = encode_identity(&identity);
            prop_assert_eq!(decode(&text).unwrap(), identity);
        }

        #[test]
        fn decode_never_panics(text in "\\PC{0,80}") {
            let _ = decode(&text);
        }
    }
}
