//! Server-to-guardian wire events.
//!
//! Broadcasts are best-effort; persistence is the source of truth, and a
//! guardian that missed one catches up by reading transaction state.

use crate::{GuardianId, TransactionId, VaultId};
use serde::{Deserialize, Serialize};

/// Events pushed to guardian sessions in a vault room.
///
/// Dispatched by string name on the wire as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "guardian:connected", rename_all = "camelCase")]
    GuardianConnected {
        guardian_id: GuardianId,
        vault_id: VaultId,
    },

    #[serde(rename = "guardian:disconnected", rename_all = "camelCase")]
    GuardianDisconnected {
        guardian_id: GuardianId,
        vault_id: VaultId,
    },

    /// Round 2 aggregation committed; guardians may fetch their Round 3
    /// inputs.
    #[serde(rename = "signing:round2_ready", rename_all = "camelCase")]
    Round2Ready {
        transaction_id: TransactionId,
        /// Hex scalar.
        r: String,
        /// Hex scalar.
        k_total: String,
        participants: Vec<GuardianId>,
    },

    /// Final signature persisted, ceremony complete.
    #[serde(rename = "signing:complete", rename_all = "camelCase")]
    SigningComplete {
        transaction_id: TransactionId,
        /// Decimal string.
        r: String,
        /// Decimal string.
        s: String,
    },

    /// Ceremony ended without a signature (cancel, timeout, aggregation
    /// failure).
    #[serde(rename = "signing:cancelled", rename_all = "camelCase")]
    SigningCancelled {
        transaction_id: TransactionId,
        reason: String,
    },
}
