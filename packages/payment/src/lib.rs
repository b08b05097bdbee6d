//! HTLC-secured Cashu ecash payment engine: locks a fare under a payment-hash
//! spending condition, claims it by preimage, and bridges cross-mint
//! payments over Lightning with ride-id-keyed idempotence.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod htlc;

pub use bridge::{bridge_payment, claim_deposit_by_quote_id, BridgeOutcome};
pub use cdk::nuts::Proofs;
pub use engine::PaymentEngine;
pub use error::{PaymentEngineError, Result};
pub use htlc::{cdk_pubkey_from_id32, default_escrow_locktime, generate_preimage, ClaimOutcome, LockOutcome, PreimagePair};
