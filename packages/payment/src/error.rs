//! Payment-engine-local error type. Converts into `wayfare_core::PeerError`
//! at the coordinator boundary via `PaymentError` (see
//! `wayfare_core::error::PaymentError`).

use thiserror::Error;
use wayfare_core::error::PaymentError as CorePaymentError;

#[derive(Debug, Error)]
pub enum PaymentEngineError {
    #[error("preimage does not hash to the expected payment hash")]
    PreimageMismatch,

    #[error("insufficient balance: need {required} sats, have {available} sats")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("{spent} of {total} proofs already spent")]
    ProofsSpent { spent: u32, total: u32 },

    #[error("not connected to mint {0}")]
    NotConnected(String),

    #[error("mint error: {0}")]
    Mint(String),

    #[error("bridge payment still pending at the mint")]
    BridgePending,

    #[error(transparent)]
    Storage(#[from] eyre::Report),
}

impl From<PaymentEngineError> for CorePaymentError {
    fn from(err: PaymentEngineError) -> Self {
        match err {
            PaymentEngineError::PreimageMismatch => CorePaymentError::PreimageMismatch,
            PaymentEngineError::InsufficientBalance { required, available } => {
                CorePaymentError::InsufficientBalance { required, available }
            }
            PaymentEngineError::ProofsSpent { spent, total } => CorePaymentError::ProofsSpent { spent, total },
            PaymentEngineError::NotConnected(_) => CorePaymentError::NotConnected,
            PaymentEngineError::Mint(msg) => CorePaymentError::MintError(msg),
            PaymentEngineError::BridgePending => CorePaymentError::MintError("bridge pending".into()),
            PaymentEngineError::Storage(report) => CorePaymentError::MintError(report.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentEngineError>;
