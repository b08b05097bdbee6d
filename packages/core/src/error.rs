//! Shared, non-panicking error taxonomy. Library code returns `Result<T,
//! PeerError>` (or a local error that `From`-converts into it); binaries wrap
//! `PeerError` in `eyre::Report` at the top level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid ride transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("bridge payment pending, poll again")]
    BridgePending,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("persisted state was corrupt and has been cleared: {0}")]
    PersistenceCorrupt(String),

    #[error("security alert: {0}")]
    SecurityAlert(String),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("insufficient balance: need {required} sats, have {available} sats")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("{spent} of {total} proofs already spent")]
    ProofsSpent { spent: u32, total: u32 },

    #[error("preimage does not hash to the expected payment hash")]
    PreimageMismatch,

    #[error("not connected to mint")]
    NotConnected,

    #[error("mint error: {0}")]
    MintError(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
