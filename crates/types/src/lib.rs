//! Shared types for the guardian vault signing coordinator.
//!
//! Identifiers, the per-ceremony transaction document, vault/guardian
//! reference entities, server-to-guardian wire events, and the
//! workspace-wide error enum.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod directory;
pub mod error;
pub mod events;
pub mod transaction;

pub use directory::{Guardian, GuardianStatus, Vault};
pub use error::{Error, Result};
pub use events::ServerEvent;
pub use transaction::{
    FinalSignature, Round1Share, Round2Aggregate, Round3Share, SigningRound, Transaction,
    TransactionStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct VaultId(pub String);

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VaultId {
    fn from(s: String) -> Self {
        VaultId(s)
    }
}

impl From<&str> for VaultId {
    fn from(s: &str) -> Self {
        VaultId(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct GuardianId(pub String);

impl fmt::Display for GuardianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GuardianId {
    fn from(s: String) -> Self {
        GuardianId(s)
    }
}

impl From<&str> for GuardianId {
    fn from(s: &str) -> Self {
        GuardianId(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        TransactionId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        TransactionId(s)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        TransactionId(s.to_string())
    }
}
