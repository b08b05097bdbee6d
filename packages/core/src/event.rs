//! Signed event codec: canonical id hashing, Schnorr signing, and verification.
//!
//! Wire shape mirrors the Nostr event family: `id` is the SHA-256 of the
//! canonical six-field JSON array `[0, pubkey, created_at, kind, tags, content]`,
//! and `sig` is a Schnorr signature over `id` under `pubkey` (BIP-340, secp256k1).

use secp256k1::hashes::sha256 as secp_sha256;
use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::hash::sha256;
use crate::types::Id32;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
}

pub type Tag = Vec<String>;

/// An unsigned event draft, filled in by the caller and signed by [`sign`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub pubkey: Id32,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// A signed, wire-ready event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Id32,
    pub pubkey: Id32,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// First value of the given tag name, e.g. `tag_value("e")` for `#e`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
            .collect()
    }
}

/// Canonical JSON bytes for the six-field array used in id hashing. A
/// hand-rolled array is required here (not a derived `Serialize`) because the
/// wire form is positional, not a struct with named fields.
fn canonical_bytes(draft: &EventDraft) -> Vec<u8> {
    let value = json!([
        0,
        draft.pubkey.to_hex(),
        draft.created_at,
        draft.kind,
        draft.tags,
        draft.content,
    ]);
    canonical_json(&value).into_bytes()
}

/// Serializes with no insignificant whitespace and preserves key/array order
/// exactly as constructed (serde_json's default compact writer already does
/// this for arrays; this wrapper exists so future escaping rules have one
/// call site).
fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).expect("json::Value always serializes")
}

pub fn compute_id(draft: &EventDraft) -> Id32 {
    Id32(sha256(&canonical_bytes(draft)))
}

/// Derives the x-only public key identity for a secret key, the same
/// derivation `sign` checks `draft.pubkey` against. Lets callers build a
/// signing identity from one configured secret key without repeating the
/// `Keypair`/`x_only_public_key` dance at every call site.
pub fn pubkey_of(secret_key: &SecretKey) -> Id32 {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let (xonly, _parity) = keypair.x_only_public_key();
    Id32(xonly.serialize())
}

/// Sign a draft, producing a wire-ready [`Event`].
pub fn sign(draft: EventDraft, secret_key: &SecretKey) -> Result<Event, CodecError> {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let (xonly, _parity) = keypair.x_only_public_key();
    let derived_pub = Id32(xonly.serialize());
    if derived_pub != draft.pubkey {
        return Err(CodecError::Malformed(
            "draft.pubkey does not match signer".into(),
        ));
    }

    let id = compute_id(&draft);
    let msg = Message::from_digest(id.0);
    let sig = secp.sign_schnorr(&msg, &keypair);

    Ok(Event {
        id,
        pubkey: draft.pubkey,
        created_at: draft.created_at,
        kind: draft.kind,
        tags: draft.tags,
        content: draft.content,
        sig: hex::encode(sig.as_ref()),
    })
}

/// Recompute the id and check the Schnorr signature against `pubkey`.
pub fn verify(event: &Event) -> Result<(), CodecError> {
    let draft = EventDraft {
        pubkey: event.pubkey,
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    let expected_id = compute_id(&draft);
    if expected_id != event.id {
        return Err(CodecError::Malformed("id does not match content".into()));
    }

    let secp = Secp256k1::verification_only();
    let xonly = XOnlyPublicKey::from_slice(&event.pubkey.0)?;
    let sig_bytes = hex::decode(&event.sig)
        .map_err(|e| CodecError::Malformed(format!("invalid sig hex: {e}")))?;
    let sig = Signature::from_slice(&sig_bytes)?;
    let msg = Message::from_digest(event.id.0);

    secp.verify_schnorr(&sig, &msg, &xonly)
        .map_err(|_| CodecError::BadSignature)
}

/// Used internally for Schnorr message construction; re-exported so callers
/// needing a raw digest type don't pull in `secp256k1::hashes` themselves.
pub type Sha256Hash = secp_sha256::Hash;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn test_keypair() -> (SecretKey, Id32) {
        let secp = Secp256k1::new();
        let (sk, _pk) = secp.generate_keypair(&mut OsRng);
        let keypair = Keypair::from_secret_key(&secp, &sk);
        let (xonly, _) = keypair.x_only_public_key();
        (sk, Id32(xonly.serialize()))
    }

    fn draft(pubkey: Id32) -> EventDraft {
        EventDraft {
            pubkey,
            created_at: 1_700_000_000,
            kind: 30101,
            tags: vec![vec!["g".into(), "9q8yy".into()]],
            content: "{}".into(),
        }
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (sk, pk) = test_keypair();
        let event = sign(draft(pk), &sk).unwrap();
        verify(&event).unwrap();
    }

    #[test]
    fn tampering_with_content_breaks_verification() {
        let (sk, pk) = test_keypair();
        let mut event = sign(draft(pk), &sk).unwrap();
        event.content = "{\"tampered\":true}".into();
        assert!(verify(&event).is_err());
    }

    #[test]
    fn wrong_signer_is_rejected_before_signing() {
        let (sk, _pk) = test_keypair();
        let (_other_sk, other_pk) = test_keypair();
        assert!(sign(draft(other_pk), &sk).is_err());
    }

    #[test]
    fn compute_id_is_deterministic() {
        let (_sk, pk) = test_keypair();
        let d = draft(pk);
        assert_eq!(compute_id(&d), compute_id(&d));
    }

    #[test]
    fn tag_value_finds_first_match() {
        let (sk, pk) = test_keypair();
        let event = sign(draft(pk), &sk).unwrap();
        assert_eq!(event.tag_value("g"), Some("9q8yy"));
        assert_eq!(event.tag_value("e"), None);
    }
}
