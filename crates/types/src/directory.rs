//! Vault and guardian reference entities.
//!
//! These are administrative records the coordinator reads but does not
//! drive: vault membership, thresholds, and the master public key the
//! final signature verifies against.

use crate::{GuardianId, VaultId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A (threshold, total) guardian group and its master public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub vault_id: VaultId,
    pub name: String,
    pub threshold: u32,
    pub total_guardians: u32,
    #[serde(default)]
    pub guardian_ids: Vec<GuardianId>,
    /// Compressed secp256k1 point, 66 hex chars. Unset until key ceremony
    /// finishes on the guardian side.
    #[serde(default)]
    pub master_public_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardianStatus {
    Enrolled,
    Active,
    Revoked,
}

impl fmt::Display for GuardianStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardianStatus::Enrolled => write!(f, "enrolled"),
            GuardianStatus::Active => write!(f, "active"),
            GuardianStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// One share-holding party of a vault. The share itself never exists
/// server-side; `share_id` is an opaque handle into guardian custody.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guardian {
    pub guardian_id: GuardianId,
    pub vault_id: VaultId,
    pub name: String,
    pub status: GuardianStatus,
    #[serde(default)]
    pub share_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Guardian {
    /// Whether this guardian may open a session and submit rounds.
    pub fn can_sign(&self) -> bool {
        !matches!(self.status, GuardianStatus::Revoked)
    }
}
