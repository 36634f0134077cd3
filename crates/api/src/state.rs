//! Shared application state for the coordinator server.

use quorum_coordinator::MpcCoordinator;
use quorum_sessions::SessionRegistry;
use quorum_storage::{GuardianRepository, TransactionRepository, VaultRepository};
use std::sync::Arc;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<dyn TransactionRepository>,
    pub vaults: Arc<dyn VaultRepository>,
    pub guardians: Arc<dyn GuardianRepository>,
    pub registry: Arc<SessionRegistry>,
    pub coordinator: Arc<MpcCoordinator>,
}

impl AppState {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        vaults: Arc<dyn VaultRepository>,
        guardians: Arc<dyn GuardianRepository>,
        registry: Arc<SessionRegistry>,
        coordinator: Arc<MpcCoordinator>,
    ) -> Self {
        Self {
            transactions,
            vaults,
            guardians,
            registry,
            coordinator,
        }
    }
}
