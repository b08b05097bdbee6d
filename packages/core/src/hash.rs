//! SHA-256 hashing: event ids and HTLC payment hashes.

use sha2::{Digest, Sha256};

use crate::types::Id32;

/// Compute SHA-256 over arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// `payment_hash = SHA-256(preimage)`, the HTLC hash published in `CONFIRMATION`.
pub fn payment_hash(preimage: &[u8; 32]) -> Id32 {
    Id32(sha256(preimage))
}

/// Event id is the SHA-256 of the canonical six-field JSON array. Callers
/// build that array with [`crate::event::canonical_bytes`]; this function is
/// kept separate so payment-hash and event-id hashing share one primitive.
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            bytes32_to_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn payment_hash_is_deterministic() {
        let preimage = [42u8; 32];
        assert_eq!(payment_hash(&preimage), payment_hash(&preimage));
    }

    #[test]
    fn payment_hash_differs_for_different_preimages() {
        assert_ne!(payment_hash(&[1u8; 32]), payment_hash(&[2u8; 32]));
    }
}
