//! The MPC coordinator.
//!
//! Sequences the four-round ceremony: accepts round submissions from
//! guardians, serializes progression through the repository's conditional
//! writes, runs the server-side aggregation rounds exactly once, and
//! pushes progress events into the session registry.
//!
//! Every mutating path follows the same frame: validate, append or
//! compare-and-set against the expected status, then broadcast. The
//! aggregation for rounds 2 and 4 only ever runs after the write that
//! completed the preceding round is durable, and its own write is guarded
//! on the status that write produced — losing that guard means another
//! racer (or a previous life of this process) already did the work.

use crate::fsm::CeremonyFsm;
use chrono::{DateTime, Duration, Utc};
use quorum_crypto as crypto;
use quorum_sessions::SessionRegistry;
use quorum_storage::{
    AppendOutcome, GuardianRepository, RoundSubmission, TransactionRepository, VaultRepository,
};
use quorum_types::{
    Error, FinalSignature, GuardianId, Result, Round1Share, Round2Aggregate, Round3Share,
    ServerEvent, Transaction, TransactionId, TransactionStatus, VaultId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a participating guardian needs to compute its Round 3 share.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Round2Info {
    /// `Σ k_i mod n`, hex.
    pub k_total: String,
    /// `R.x mod n`, hex.
    pub r: String,
    pub num_parties: u32,
}

/// Orchestrator for signing ceremonies.
///
/// Stateless between calls: everything durable lives in the repository,
/// so any number of coordinator instances (or process restarts) can share
/// one ceremony.
pub struct MpcCoordinator {
    transactions: Arc<dyn TransactionRepository>,
    vaults: Arc<dyn VaultRepository>,
    guardians: Arc<dyn GuardianRepository>,
    registry: Arc<SessionRegistry>,
    transaction_timeout: Duration,
}

impl MpcCoordinator {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        vaults: Arc<dyn VaultRepository>,
        guardians: Arc<dyn GuardianRepository>,
        registry: Arc<SessionRegistry>,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            transactions,
            vaults,
            guardians,
            registry,
            transaction_timeout,
        }
    }

    /// Create a `pending` ceremony for a vault.
    pub async fn create_transaction(
        &self,
        vault_id: &VaultId,
        message_hash: String,
        signatures_required: Option<u32>,
    ) -> Result<Transaction> {
        let vault = self.vaults.get(vault_id).await?;
        crypto::parse_message_hash(&message_hash)?;

        let required = signatures_required.unwrap_or(vault.threshold);
        if required == 0 || required > vault.total_guardians {
            return Err(Error::InvalidPayload(format!(
                "signatures_required must be in 1..={}, got {}",
                vault.total_guardians, required
            )));
        }

        let tx = Transaction::new(
            vault_id.clone(),
            message_hash,
            required,
            self.transaction_timeout,
        );
        self.transactions.create(tx.clone()).await?;
        info!(
            "created transaction={} vault={} threshold={}",
            tx.transaction_id, vault_id, required
        );
        Ok(tx)
    }

    /// Accept a guardian's `(k_i, R_i)` contribution.
    ///
    /// The first accepted submission opens Round 1; the one that fills it
    /// triggers Round 2 aggregation inline.
    pub async fn submit_round1(
        &self,
        transaction_id: &TransactionId,
        guardian_id: &GuardianId,
        nonce_share: &str,
        r_point: &str,
    ) -> Result<AppendOutcome> {
        crypto::parse_nonzero_scalar_hex(nonce_share)?;
        crypto::parse_point_hex(r_point)?;

        let tx = self.transactions.get(transaction_id).await?;
        self.check_vault_membership(&tx, guardian_id).await?;
        if tx.is_terminal() && tx.status != TransactionStatus::Completed {
            return Err(Error::TransactionNotActive(transaction_id.clone()));
        }

        if tx.status == TransactionStatus::Pending {
            self.open_round1(transaction_id).await?;
        }

        let outcome = self
            .transactions
            .append_round_submission(
                transaction_id,
                guardian_id,
                RoundSubmission::Round1(Round1Share {
                    nonce_share: nonce_share.to_string(),
                    r_point: r_point.to_string(),
                }),
            )
            .await?;

        info!(
            "round 1 submission accepted: transaction={} guardian={} count={} replay={}",
            transaction_id, guardian_id, outcome.count, outcome.idempotent_replay
        );

        if outcome.completed_round {
            self.finish_round1(transaction_id).await?;
        }
        Ok(outcome)
    }

    /// Hand a participating guardian its Round 3 inputs. Requires the
    /// Round 2 aggregate to be committed and Round 3 open.
    pub async fn get_round2_data(
        &self,
        transaction_id: &TransactionId,
        guardian_id: &GuardianId,
    ) -> Result<Round2Info> {
        let tx = self.transactions.get(transaction_id).await?;
        if !tx.is_participant(guardian_id) {
            return Err(Error::NotParticipating {
                transaction_id: transaction_id.clone(),
                guardian_id: guardian_id.clone(),
            });
        }
        match tx.status.phase() {
            None => Err(Error::TransactionNotActive(transaction_id.clone())),
            Some(phase) if phase < 3 => Err(Error::WrongPhase {
                round: 2,
                status: tx.status,
            }),
            _ => {
                let round2 = tx
                    .round2_data
                    .ok_or_else(|| Error::Storage("round 2 aggregate missing".to_string()))?;
                Ok(Round2Info {
                    k_total: round2.k_total,
                    r: round2.r,
                    num_parties: tx.signatures_required,
                })
            }
        }
    }

    /// Accept a guardian's signature share `s_i`. Filling the round
    /// triggers Round 4 aggregation inline.
    pub async fn submit_round3(
        &self,
        transaction_id: &TransactionId,
        guardian_id: &GuardianId,
        signature_share: &str,
    ) -> Result<AppendOutcome> {
        crypto::parse_nonzero_scalar_hex(signature_share)?;

        let tx = self.transactions.get(transaction_id).await?;
        self.check_vault_membership(&tx, guardian_id).await?;
        if tx.is_terminal() && tx.status != TransactionStatus::Completed {
            return Err(Error::TransactionNotActive(transaction_id.clone()));
        }

        let outcome = self
            .transactions
            .append_round_submission(
                transaction_id,
                guardian_id,
                RoundSubmission::Round3(Round3Share {
                    signature_share: signature_share.to_string(),
                }),
            )
            .await?;

        info!(
            "round 3 submission accepted: transaction={} guardian={} count={} replay={}",
            transaction_id, guardian_id, outcome.count, outcome.idempotent_replay
        );

        if outcome.completed_round {
            self.finish_round3(transaction_id).await?;
        }
        Ok(outcome)
    }

    /// The final `(r, s)`, once the ceremony completed.
    pub async fn get_final_signature(
        &self,
        transaction_id: &TransactionId,
        guardian_id: &GuardianId,
    ) -> Result<FinalSignature> {
        let tx = self.transactions.get(transaction_id).await?;
        self.check_vault_membership(&tx, guardian_id).await?;
        match tx.status {
            TransactionStatus::Completed => tx
                .final_signature
                .ok_or_else(|| Error::Storage("final signature missing".to_string())),
            TransactionStatus::Failed | TransactionStatus::Cancelled => {
                Err(Error::TransactionNotActive(transaction_id.clone()))
            }
            status => Err(Error::WrongPhase { round: 4, status }),
        }
    }

    /// Administrative cancellation of any non-terminal ceremony.
    pub async fn cancel(&self, transaction_id: &TransactionId, reason: &str) -> Result<()> {
        let reason_owned = reason.to_string();
        let mutate = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.cancel()?;
            tx.status = fsm.current();
            tx.failure_reason = Some(reason_owned.clone());
            Ok(())
        };
        let result = self
            .transactions
            .atomic_update(transaction_id, ACTIVE_STATUSES, &mutate)
            .await;
        match result {
            Ok(tx) => {
                warn!(
                    "transaction cancelled: transaction={} reason={}",
                    transaction_id, reason
                );
                self.registry
                    .broadcast(
                        &tx.vault_id,
                        ServerEvent::SigningCancelled {
                            transaction_id: transaction_id.clone(),
                            reason: reason.to_string(),
                        },
                    )
                    .await;
                Ok(())
            }
            Err(Error::ConflictingStatus { .. }) => {
                Err(Error::TransactionNotActive(transaction_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep ceremonies past their deadline into `failed`. Returns how
    /// many this pass transitioned.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.transactions.list_expired(now).await?;
        let mut swept = 0;
        for tx in expired {
            if self.fail_transaction(&tx.transaction_id, "timeout").await? {
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Move a ceremony to `failed`, broadcasting the reason. `Ok(false)`
    /// means it was already terminal — somebody else got there first.
    pub async fn fail_transaction(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<bool> {
        let reason_owned = reason.to_string();
        let mutate = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.fail()?;
            tx.status = fsm.current();
            tx.failure_reason = Some(reason_owned.clone());
            Ok(())
        };
        let result = self
            .transactions
            .atomic_update(transaction_id, ACTIVE_STATUSES, &mutate)
            .await;
        match result {
            Ok(tx) => {
                warn!(
                    "transaction failed: transaction={} reason={}",
                    transaction_id, reason
                );
                self.registry
                    .broadcast(
                        &tx.vault_id,
                        ServerEvent::SigningCancelled {
                            transaction_id: transaction_id.clone(),
                            reason: reason.to_string(),
                        },
                    )
                    .await;
                Ok(true)
            }
            Err(Error::ConflictingStatus { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn check_vault_membership(
        &self,
        tx: &Transaction,
        guardian_id: &GuardianId,
    ) -> Result<()> {
        let guardian = self.guardians.get(guardian_id).await?;
        if guardian.vault_id != tx.vault_id || !guardian.can_sign() {
            return Err(Error::NotParticipating {
                transaction_id: tx.transaction_id.clone(),
                guardian_id: guardian_id.clone(),
            });
        }
        Ok(())
    }

    async fn open_round1(&self, transaction_id: &TransactionId) -> Result<()> {
        let opened_at = Utc::now();
        let mutate = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.open_round1()?;
            tx.status = fsm.current();
            tx.round1_started_at = Some(opened_at);
            Ok(())
        };
        match self
            .transactions
            .atomic_update(transaction_id, &[TransactionStatus::Pending], &mutate)
            .await
        {
            Ok(_) => Ok(()),
            // Another submission opened the round first.
            Err(Error::ConflictingStatus { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Round 2: aggregate the full Round 1 map, then open Round 3.
    ///
    /// Two durable steps. The first is guarded on `signing_round1`, so of
    /// all concurrent finishers exactly one commits the aggregate; the
    /// second is guarded on `signing_round2` and owns the broadcast.
    async fn finish_round1(&self, transaction_id: &TransactionId) -> Result<()> {
        let started_at = Utc::now();
        let aggregate = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.begin_round2()?;
            tx.round2_data = Some(aggregate_round1(&tx.round1_data)?);
            tx.status = fsm.current();
            tx.round2_started_at = Some(started_at);
            Ok(())
        };
        match self
            .transactions
            .atomic_update(
                transaction_id,
                &[TransactionStatus::SigningRound1],
                &aggregate,
            )
            .await
        {
            Ok(_) => {}
            Err(Error::ConflictingStatus { .. }) => {
                debug!("round 2 already committed for transaction={}", transaction_id);
                return Ok(());
            }
            Err(err @ Error::AggregationFailure(_)) => {
                let reason = err.to_string();
                self.fail_transaction(transaction_id, &reason).await?;
                return Err(err);
            }
            Err(e) => return Err(e),
        }

        let opened_at = Utc::now();
        let open = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.open_round3()?;
            tx.status = fsm.current();
            tx.round3_started_at = Some(opened_at);
            Ok(())
        };
        let tx = match self
            .transactions
            .atomic_update(transaction_id, &[TransactionStatus::SigningRound2], &open)
            .await
        {
            Ok(tx) => tx,
            Err(Error::ConflictingStatus { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let round2 = tx
            .round2_data
            .as_ref()
            .ok_or_else(|| Error::Storage("round 2 aggregate missing".to_string()))?;
        info!(
            "round 2 ready: transaction={} r={} participants={}",
            transaction_id,
            round2.r,
            tx.participating_guardians.len()
        );
        self.registry
            .broadcast(
                &tx.vault_id,
                ServerEvent::Round2Ready {
                    transaction_id: tx.transaction_id.clone(),
                    r: round2.r.clone(),
                    k_total: round2.k_total.clone(),
                    participants: tx.participating_guardians.clone(),
                },
            )
            .await;
        Ok(())
    }

    /// Round 4: combine signature shares, then mark completed.
    async fn finish_round3(&self, transaction_id: &TransactionId) -> Result<()> {
        let started_at = Utc::now();
        let combine = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.begin_round4()?;
            let round2 = tx
                .round2_data
                .as_ref()
                .ok_or_else(|| Error::Storage("round 2 aggregate missing".to_string()))?;
            tx.final_signature = Some(aggregate_round3(round2, &tx.round3_data)?);
            tx.status = fsm.current();
            tx.round4_started_at = Some(started_at);
            Ok(())
        };
        match self
            .transactions
            .atomic_update(transaction_id, &[TransactionStatus::SigningRound3], &combine)
            .await
        {
            Ok(_) => {}
            Err(Error::ConflictingStatus { .. }) => {
                debug!("round 4 already committed for transaction={}", transaction_id);
                return Ok(());
            }
            Err(err @ Error::AggregationFailure(_)) => {
                let reason = err.to_string();
                self.fail_transaction(transaction_id, &reason).await?;
                return Err(err);
            }
            Err(e) => return Err(e),
        }

        let completed_at = Utc::now();
        let complete = move |tx: &mut Transaction| {
            let mut fsm = CeremonyFsm::from_status(tx.transaction_id.clone(), tx.status);
            fsm.complete()?;
            tx.status = fsm.current();
            tx.completed_at = Some(completed_at);
            Ok(())
        };
        let tx = match self
            .transactions
            .atomic_update(transaction_id, &[TransactionStatus::SigningRound4], &complete)
            .await
        {
            Ok(tx) => tx,
            Err(Error::ConflictingStatus { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let signature = tx
            .final_signature
            .as_ref()
            .ok_or_else(|| Error::Storage("final signature missing".to_string()))?;
        info!(
            "ceremony complete: transaction={} r={} s={}",
            transaction_id, signature.r_hex, signature.s_hex
        );
        self.registry
            .broadcast(
                &tx.vault_id,
                ServerEvent::SigningComplete {
                    transaction_id: tx.transaction_id.clone(),
                    r: signature.r.clone(),
                    s: signature.s.clone(),
                },
            )
            .await;
        Ok(())
    }
}

const ACTIVE_STATUSES: &[TransactionStatus] = &[
    TransactionStatus::Pending,
    TransactionStatus::SigningRound1,
    TransactionStatus::SigningRound2,
    TransactionStatus::SigningRound3,
    TransactionStatus::SigningRound4,
];

/// `k_total = Σ k_i`, `R = Σ R_i`, `r = R.x mod n` over the full Round 1
/// map. Deterministic: the map iterates in guardian-id order and both
/// sums are commutative.
fn aggregate_round1(round1_data: &BTreeMap<GuardianId, Round1Share>) -> Result<Round2Aggregate> {
    let mut nonces = Vec::with_capacity(round1_data.len());
    let mut points = Vec::with_capacity(round1_data.len());
    for share in round1_data.values() {
        nonces.push(crypto::parse_nonzero_scalar_hex(&share.nonce_share)?);
        points.push(crypto::parse_point_hex(&share.r_point)?);
    }

    let k_total = crypto::sum_scalars(&nonces);
    let r_point = crypto::sum_points(&points);
    let r = crypto::x_coordinate_mod_n(&r_point)?;

    Ok(Round2Aggregate {
        k_total: crypto::scalar_to_hex(&k_total),
        r_point: crypto::point_to_hex(&r_point)?,
        r: crypto::scalar_to_hex(&r),
    })
}

/// `s = Σ s_i mod n` in canonical low-s form.
fn aggregate_round3(
    round2: &Round2Aggregate,
    round3_data: &BTreeMap<GuardianId, Round3Share>,
) -> Result<FinalSignature> {
    let mut shares = Vec::with_capacity(round3_data.len());
    for share in round3_data.values() {
        shares.push(crypto::parse_nonzero_scalar_hex(&share.signature_share)?);
    }

    let s = crypto::normalize_s(crypto::sum_scalars(&shares))?;
    let r = crypto::parse_nonzero_scalar_hex(&round2.r)?;

    Ok(FinalSignature {
        r: crypto::scalar_to_decimal(&r),
        s: crypto::scalar_to_decimal(&s),
        r_hex: crypto::scalar_to_hex(&r),
        s_hex: crypto::scalar_to_hex(&s),
    })
}
