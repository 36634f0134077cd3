//! Repository contracts and the round-append semantics shared by every
//! backend.
//!
//! The repository is the serialization point of the whole system: all
//! ceremony mutation funnels through `atomic_update` (compare-and-set on
//! `status`) and `append_round_submission` (atomic add-to-map-if-absent).
//! Nothing above this layer takes locks on transaction data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quorum_types::{
    Error, Guardian, GuardianId, Result, Round1Share, Round3Share, SigningRound, Transaction,
    TransactionId, TransactionStatus, Vault, VaultId,
};

/// How many times a lost conditional write is retried before surfacing
/// `RepositoryConflict`.
pub const CAS_MAX_ATTEMPTS: u32 = 5;

/// A guardian-driven round contribution.
#[derive(Debug, Clone)]
pub enum RoundSubmission {
    Round1(Round1Share),
    Round3(Round3Share),
}

impl RoundSubmission {
    pub fn round(&self) -> SigningRound {
        match self {
            RoundSubmission::Round1(_) => SigningRound::Round1,
            RoundSubmission::Round3(_) => SigningRound::Round3,
        }
    }
}

/// Result of an `append_round_submission`.
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    /// Post-write size of the round map.
    pub count: usize,
    /// Whether this write brought the round to `signatures_required`.
    /// False on idempotent replays, so aggregation runs exactly once.
    pub completed_round: bool,
    /// The payload was already present, byte-identical; nothing changed.
    pub idempotent_replay: bool,
}

/// Durable store of ceremony documents.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert a fresh document; rejects duplicates.
    async fn create(&self, tx: Transaction) -> Result<()>;

    async fn get(&self, id: &TransactionId) -> Result<Transaction>;

    async fn list_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Transaction>>;

    /// Non-terminal ceremonies a guardian of the vault may still act on.
    async fn list_active_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Transaction>>;

    /// Non-terminal ceremonies whose deadline has passed.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>>;

    /// Read-check-mutate-write, conditioned on `status` being one of
    /// `expected` and unchanged at write time. Returns the stored result.
    ///
    /// `ConflictingStatus` means the precondition failed; the bounded
    /// retry only covers writes lost to a concurrent committer.
    async fn atomic_update(
        &self,
        id: &TransactionId,
        expected: &[TransactionStatus],
        mutate: &(dyn for<'a> Fn(&'a mut Transaction) -> Result<()> + Send + Sync),
    ) -> Result<Transaction>;

    /// Atomic add-to-map-if-absent for a round contribution, idempotent
    /// per `(round, guardian)`.
    async fn append_round_submission(
        &self,
        id: &TransactionId,
        guardian_id: &GuardianId,
        submission: RoundSubmission,
    ) -> Result<AppendOutcome>;
}

/// Vault reference data.
#[async_trait]
pub trait VaultRepository: Send + Sync {
    async fn create(&self, vault: Vault) -> Result<()>;
    async fn get(&self, id: &VaultId) -> Result<Vault>;
    async fn list(&self) -> Result<Vec<Vault>>;
    async fn update(&self, vault: Vault) -> Result<()>;
    async fn delete(&self, id: &VaultId) -> Result<()>;
}

/// Guardian reference data.
#[async_trait]
pub trait GuardianRepository: Send + Sync {
    async fn create(&self, guardian: Guardian) -> Result<()>;
    async fn get(&self, id: &GuardianId) -> Result<Guardian>;
    async fn list_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Guardian>>;
    async fn update(&self, guardian: Guardian) -> Result<()>;
    async fn delete(&self, id: &GuardianId) -> Result<()>;
}

/// The append semantics, applied to an up-to-date copy of the document.
///
/// Backends either run this under their own exclusion (memory) or use it
/// to classify the miss of an optimistic single-statement write
/// (postgres). Returns `Ok(None)` with a mutated `tx` when the write
/// should be persisted; `Ok(Some(outcome))` when nothing needs writing.
pub(crate) fn apply_append(
    tx: &mut Transaction,
    guardian_id: &GuardianId,
    submission: &RoundSubmission,
) -> Result<Option<AppendOutcome>> {
    let round = submission.round();
    let required = match round {
        SigningRound::Round1 => TransactionStatus::SigningRound1,
        SigningRound::Round3 => TransactionStatus::SigningRound3,
    };

    if tx.status != required {
        // Replays of an already-committed payload stay idempotent even
        // after the round has moved on.
        if replay_matches(tx, guardian_id, submission) {
            return Ok(Some(AppendOutcome {
                count: tx.round_count(round),
                completed_round: false,
                idempotent_replay: true,
            }));
        }
        if tx.is_terminal() {
            return Err(Error::TransactionNotActive(tx.transaction_id.clone()));
        }
        // Round 1 knocks on a frozen participant set before it is a
        // phase problem: stragglers get NotParticipating, not WrongPhase.
        if round == SigningRound::Round1
            && tx.participants_frozen()
            && !tx.is_participant(guardian_id)
        {
            return Err(Error::NotParticipating {
                transaction_id: tx.transaction_id.clone(),
                guardian_id: guardian_id.clone(),
            });
        }
        return Err(Error::WrongPhase {
            round: round.number(),
            status: tx.status,
        });
    }

    match submission {
        RoundSubmission::Round1(share) => {
            if let Some(existing) = tx.round1_data.get(guardian_id) {
                if existing == share {
                    return Ok(Some(AppendOutcome {
                        count: tx.round1_data.len(),
                        completed_round: false,
                        idempotent_replay: true,
                    }));
                }
                return Err(Error::DuplicateConflict {
                    round: 1,
                    guardian_id: guardian_id.clone(),
                });
            }
            if tx.participants_frozen() {
                return Err(Error::NotParticipating {
                    transaction_id: tx.transaction_id.clone(),
                    guardian_id: guardian_id.clone(),
                });
            }
            tx.round1_data.insert(guardian_id.clone(), share.clone());
            tx.participating_guardians.push(guardian_id.clone());
        }
        RoundSubmission::Round3(share) => {
            if !tx.is_participant(guardian_id) {
                return Err(Error::NotParticipating {
                    transaction_id: tx.transaction_id.clone(),
                    guardian_id: guardian_id.clone(),
                });
            }
            if let Some(existing) = tx.round3_data.get(guardian_id) {
                if existing == share {
                    return Ok(Some(AppendOutcome {
                        count: tx.round3_data.len(),
                        completed_round: false,
                        idempotent_replay: true,
                    }));
                }
                return Err(Error::DuplicateConflict {
                    round: 3,
                    guardian_id: guardian_id.clone(),
                });
            }
            tx.round3_data.insert(guardian_id.clone(), share.clone());
        }
    }

    Ok(None)
}

fn replay_matches(
    tx: &Transaction,
    guardian_id: &GuardianId,
    submission: &RoundSubmission,
) -> bool {
    match submission {
        RoundSubmission::Round1(share) => tx.round1_data.get(guardian_id) == Some(share),
        RoundSubmission::Round3(share) => tx.round3_data.get(guardian_id) == Some(share),
    }
}

pub(crate) fn outcome_for(tx: &Transaction, round: SigningRound) -> AppendOutcome {
    let count = tx.round_count(round);
    AppendOutcome {
        count,
        completed_round: count == tx.signatures_required as usize,
        idempotent_replay: false,
    }
}
