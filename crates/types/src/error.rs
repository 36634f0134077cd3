use crate::{transaction::TransactionStatus, GuardianId, TransactionId, VaultId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the signing coordinator.
///
/// Everything a guardian can be told about a rejected submission is here;
/// none of these variants ever carries secret material.
#[derive(Error, Debug)]
pub enum Error {
    #[error("vault not found: {0}")]
    VaultNotFound(VaultId),

    #[error("guardian not found: {0}")]
    GuardianNotFound(GuardianId),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("guardian {guardian_id} is not in the participant set of transaction {transaction_id}")]
    NotParticipating {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("guardian {guardian_id} already submitted round {round} with a different payload")]
    DuplicateConflict { round: u8, guardian_id: GuardianId },

    #[error("round {round} is not open while status is {status}")]
    WrongPhase { round: u8, status: TransactionStatus },

    #[error("transaction {0} is no longer active")]
    TransactionNotActive(TransactionId),

    #[error("transaction {transaction_id} is in status {actual}, not the status the update expected")]
    ConflictingStatus {
        transaction_id: TransactionId,
        actual: TransactionStatus,
    },

    #[error("aggregation failed: {0}")]
    AggregationFailure(String),

    #[error("conditional write lost the race {0} times, giving up")]
    RepositoryConflict(u32),

    #[error("deadline exceeded")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Stable machine-readable tag, used in acknowledgement payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::VaultNotFound(_)
            | Error::GuardianNotFound(_)
            | Error::TransactionNotFound(_) => "not_found",
            Error::DuplicateTransaction(_) => "duplicate_transaction",
            Error::NotParticipating { .. } => "not_participating",
            Error::InvalidPayload(_) => "invalid_payload",
            Error::DuplicateConflict { .. } => "duplicate_conflict",
            Error::WrongPhase { .. } => "wrong_phase",
            Error::TransactionNotActive(_) => "transaction_not_active",
            Error::ConflictingStatus { .. } => "conflicting_status",
            Error::AggregationFailure(_) => "aggregation_failure",
            Error::RepositoryConflict(_) => "repository_conflict",
            Error::Timeout => "timeout",
            Error::Storage(_) => "storage_error",
            Error::Transport(_) => "transport_error",
        }
    }
}
