//! HTLC locking and claiming over Cashu ecash proofs.
//!
//! A ride's fare is locked with a spending condition of
//! `P2PK(driver_pubkey) AND HTLC(payment_hash)`, with a refund branch back to
//! the rider after `ESCROW_EXPIRY_SECS`. The driver can only claim by
//! presenting the preimage; the rider only ever learns the preimage by
//! completing the ride (or never, if it is cancelled and the locktime runs out).

use cdk::nuts::{Proofs, PublicKey as CdkPublicKey, SecretKey as CdkSecretKey, SpendingConditions};
use rand::RngCore;
use wayfare_core::hash::payment_hash as compute_payment_hash;
use wayfare_core::types::ESCROW_EXPIRY_SECS;
use wayfare_core::Id32;

use crate::error::PaymentEngineError;

/// A freshly generated 32-byte preimage and its SHA-256 payment hash.
#[derive(Debug, Clone)]
pub struct PreimagePair {
    pub preimage: [u8; 32],
    pub payment_hash: Id32,
}

pub fn generate_preimage() -> PreimagePair {
    let mut preimage = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut preimage);
    let payment_hash = compute_payment_hash(&preimage);
    PreimagePair { preimage, payment_hash }
}

pub fn payment_hash_of(preimage: &[u8; 32]) -> Id32 {
    compute_payment_hash(preimage)
}

#[derive(Debug, Clone)]
pub enum LockOutcome {
    /// The fare is locked. `escrow_token` is the serialized Cashu token the
    /// driver needs to claim with the preimage; `locked_proofs` is kept
    /// alongside so the caller doesn't have to re-parse the token to call
    /// `claim_htlc`.
    Success {
        escrow_token: String,
        locked_proofs: Proofs,
        amount_sats: u64,
    },
    InsufficientBalance { required: u64, available: u64 },
    /// Some of the wallet's proofs were already spent at the mint (e.g. a
    /// prior attempt partially went through). Caller should sync the wallet
    /// and retry once.
    ProofsSpent { spent: u32, total: u32 },
    Failure { msg: String },
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed { amount_sats: u64 },
    /// The presented preimage does not hash to the escrow's payment hash.
    /// Checked locally before any network round trip so a malformed claim
    /// never touches the mint.
    PreimageMismatch,
    AlreadyClaimed,
    Expired,
}

/// Builds the HTLC spending condition for a rider locking a fare: the driver
/// pubkey is the P2PK recipient, `payment_hash` gates the claim branch, and
/// `locktime` (unix seconds) gates the refund-to-rider branch.
pub fn htlc_spending_conditions(
    driver_pubkey: &CdkPublicKey,
    payment_hash: &Id32,
    rider_refund_pubkey: &CdkPublicKey,
    locktime: i64,
) -> SpendingConditions {
    SpendingConditions::new_htlc(
        hex::encode(payment_hash.as_bytes()),
        vec![driver_pubkey.clone()],
        Some(locktime),
        Some(vec![rider_refund_pubkey.clone()]),
    )
    .expect("payment_hash is always a valid 32-byte hex string")
}

pub fn default_escrow_locktime(now_unix: i64) -> i64 {
    now_unix + ESCROW_EXPIRY_SECS
}

/// Verifies a claimed preimage locally, with zero network I/O, before
/// forwarding it to the mint. Separated from the mint-facing claim so the
/// coordinator can reject a bad PIN/preimage without spending a round trip.
pub fn verify_preimage(preimage: &[u8; 32], expected_payment_hash: &Id32) -> Result<(), PaymentEngineError> {
    if payment_hash_of(preimage).as_bytes() == expected_payment_hash.as_bytes() {
        Ok(())
    } else {
        Err(PaymentEngineError::PreimageMismatch)
    }
}

/// Derives a fresh secp256k1 keypair for a one-off P2PK/HTLC claim branch.
/// Callers persist the secret key alongside the ride context so a claim can
/// be retried after a restart.
pub fn generate_claim_keypair() -> (CdkSecretKey, CdkPublicKey) {
    let secret = CdkSecretKey::generate();
    let public = secret.public_key();
    (secret, public)
}

/// Reinterprets an x-only event pubkey as an even-parity full point, the
/// same convention `wayfare_core::crypto` uses for ECDH against Nostr-style
/// identities, so a driver's signing pubkey can name the P2PK branch of an
/// HTLC spending condition.
pub fn cdk_pubkey_from_id32(id: &Id32) -> Result<CdkPublicKey, PaymentEngineError> {
    let mut full = [0u8; 33];
    full[0] = 0x02;
    full[1..].copy_from_slice(id.as_bytes());
    CdkPublicKey::from_slice(&full).map_err(|e| PaymentEngineError::Mint(format!("invalid driver pubkey: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_hashes_to_its_own_payment_hash() {
        let pair = generate_preimage();
        assert_eq!(payment_hash_of(&pair.preimage).as_bytes(), pair.payment_hash.as_bytes());
    }

    #[test]
    fn verify_preimage_rejects_wrong_preimage() {
        let pair = generate_preimage();
        let wrong = [7u8; 32];
        assert!(verify_preimage(&wrong, &pair.payment_hash).is_err());
    }

    #[test]
    fn verify_preimage_accepts_correct_preimage() {
        let pair = generate_preimage();
        assert!(verify_preimage(&pair.preimage, &pair.payment_hash).is_ok());
    }

    #[test]
    fn default_escrow_locktime_adds_fifteen_minutes() {
        let now = 1_000_000;
        assert_eq!(default_escrow_locktime(now), now + ESCROW_EXPIRY_SECS);
    }
}
