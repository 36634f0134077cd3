//! The per-ceremony transaction document.
//!
//! One `Transaction` is the durable record of one signing ceremony. The
//! repository owns it; everything else holds transient copies.

use crate::{GuardianId, TransactionId, VaultId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ceremony lifecycle status.
///
/// The main path is monotonic: `pending` through the four signing rounds
/// to `completed`. `failed` and `cancelled` are reachable from any
/// non-terminal status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    SigningRound1,
    SigningRound2,
    SigningRound3,
    SigningRound4,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::SigningRound1 => "signing_round1",
            TransactionStatus::SigningRound2 => "signing_round2",
            TransactionStatus::SigningRound3 => "signing_round3",
            TransactionStatus::SigningRound4 => "signing_round4",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "signing_round1" => Some(TransactionStatus::SigningRound1),
            "signing_round2" => Some(TransactionStatus::SigningRound2),
            "signing_round3" => Some(TransactionStatus::SigningRound3),
            "signing_round4" => Some(TransactionStatus::SigningRound4),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "cancelled" => Some(TransactionStatus::Cancelled),
            _ => None,
        }
    }

    /// Position along the main path, for "at least this far" checks.
    /// Terminal failure states have no position.
    pub fn phase(&self) -> Option<u8> {
        match self {
            TransactionStatus::Pending => Some(0),
            TransactionStatus::SigningRound1 => Some(1),
            TransactionStatus::SigningRound2 => Some(2),
            TransactionStatus::SigningRound3 => Some(3),
            TransactionStatus::SigningRound4 => Some(4),
            TransactionStatus::Completed => Some(5),
            TransactionStatus::Failed | TransactionStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The guardian-driven rounds. Rounds 2 and 4 are server transitions and
/// never appear as submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningRound {
    Round1,
    Round3,
}

impl SigningRound {
    pub fn number(&self) -> u8 {
        match self {
            SigningRound::Round1 => 1,
            SigningRound::Round3 => 3,
        }
    }
}

/// A guardian's Round 1 contribution: its nonce share and `k_i · G`.
///
/// Scalars are big-endian hex without a prefix; points are 33-byte
/// compressed secp256k1 encodings as 66 hex chars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Round1Share {
    pub nonce_share: String,
    pub r_point: String,
}

/// Server-computed Round 2 aggregate, written once on exit from round 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Round2Aggregate {
    /// `Σ k_i mod n`, hex.
    pub k_total: String,
    /// `Σ R_i`, compressed hex.
    pub r_point: String,
    /// x-coordinate of `Σ R_i` reduced mod n, hex.
    pub r: String,
}

/// A guardian's Round 3 contribution: its signature share `s_i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Round3Share {
    pub signature_share: String,
}

/// The final `(r, s)` in canonical low-s form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinalSignature {
    /// Decimal string.
    pub r: String,
    /// Decimal string.
    pub s: String,
    pub r_hex: String,
    pub s_hex: String,
}

/// Durable record of one signing ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub vault_id: VaultId,
    /// Threshold `t`: how many guardians must contribute to each round.
    pub signatures_required: u32,
    /// 32-byte message hash `z`, 64 hex chars.
    pub message_hash: String,
    pub status: TransactionStatus,
    /// Frozen at `signatures_required` members; ordered by arrival.
    #[serde(default)]
    pub participating_guardians: Vec<GuardianId>,
    #[serde(default)]
    pub round1_data: BTreeMap<GuardianId, Round1Share>,
    #[serde(default)]
    pub round2_data: Option<Round2Aggregate>,
    #[serde(default)]
    pub round3_data: BTreeMap<GuardianId, Round3Share>,
    #[serde(default)]
    pub final_signature: Option<FinalSignature>,
    /// Set when the ceremony lands in `failed` or `cancelled`.
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Wall-clock deadline; the sweeper fails the ceremony past this.
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub round1_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub round2_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub round3_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub round4_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a fresh `pending` ceremony record.
    pub fn new(
        vault_id: VaultId,
        message_hash: String,
        signatures_required: u32,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: TransactionId::generate(),
            vault_id,
            signatures_required,
            message_hash,
            status: TransactionStatus::Pending,
            participating_guardians: Vec::new(),
            round1_data: BTreeMap::new(),
            round2_data: None,
            round3_data: BTreeMap::new(),
            final_signature: None,
            failure_reason: None,
            created_at: now,
            deadline: now + timeout,
            round1_started_at: None,
            round2_started_at: None,
            round3_started_at: None,
            round4_started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the participant set is full and therefore frozen.
    pub fn participants_frozen(&self) -> bool {
        self.participating_guardians.len() >= self.signatures_required as usize
    }

    pub fn is_participant(&self, guardian_id: &GuardianId) -> bool {
        self.participating_guardians.contains(guardian_id)
    }

    pub fn round_count(&self, round: SigningRound) -> usize {
        match round {
            SigningRound::Round1 => self.round1_data.len(),
            SigningRound::Round3 => self.round3_data.len(),
        }
    }
}
