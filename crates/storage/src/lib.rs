//! Durable storage for the signing coordinator.

pub mod memory;
pub mod postgres;
pub mod repository;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
pub use repository::{
    AppendOutcome, GuardianRepository, RoundSubmission, TransactionRepository, VaultRepository,
    CAS_MAX_ATTEMPTS,
};
