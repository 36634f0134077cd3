//! In-process repository backend.
//!
//! One `RwLock` over each table gives the same atomicity the conditional
//! writes of the durable backend provide. Used by the test suites and by
//! deployments that run without a database.

use crate::repository::{
    apply_append, outcome_for, AppendOutcome, GuardianRepository, RoundSubmission,
    TransactionRepository, VaultRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quorum_types::{
    Error, Guardian, GuardianId, Result, Transaction, TransactionId, TransactionStatus, Vault,
    VaultId,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryRepository {
    vaults: RwLock<HashMap<VaultId, Vault>>,
    guardians: RwLock<HashMap<GuardianId, Guardian>>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for MemoryRepository {
    async fn create(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.transaction_id) {
            return Err(Error::DuplicateTransaction(tx.transaction_id));
        }
        transactions.insert(tx.transaction_id.clone(), tx);
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Transaction> {
        let transactions = self.transactions.read().await;
        transactions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TransactionNotFound(id.clone()))
    }

    async fn list_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut out: Vec<Transaction> = transactions
            .values()
            .filter(|tx| &tx.vault_id == vault_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn list_active_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Transaction>> {
        Ok(TransactionRepository::list_by_vault(self, vault_id)
            .await?
            .into_iter()
            .filter(|tx| !tx.is_terminal())
            .collect())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| !tx.is_terminal() && tx.deadline < now)
            .cloned()
            .collect())
    }

    async fn atomic_update(
        &self,
        id: &TransactionId,
        expected: &[TransactionStatus],
        mutate: &(dyn for<'a> Fn(&'a mut Transaction) -> Result<()> + Send + Sync),
    ) -> Result<Transaction> {
        let mut transactions = self.transactions.write().await;
        let current = transactions
            .get(id)
            .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
        if !expected.contains(&current.status) {
            return Err(Error::ConflictingStatus {
                transaction_id: id.clone(),
                actual: current.status,
            });
        }
        let mut updated = current.clone();
        mutate(&mut updated)?;
        transactions.insert(id.clone(), updated.clone());
        Ok(updated)
    }

    async fn append_round_submission(
        &self,
        id: &TransactionId,
        guardian_id: &GuardianId,
        submission: RoundSubmission,
    ) -> Result<AppendOutcome> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(id)
            .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
        match apply_append(tx, guardian_id, &submission)? {
            Some(outcome) => Ok(outcome),
            None => Ok(outcome_for(tx, submission.round())),
        }
    }
}

#[async_trait]
impl VaultRepository for MemoryRepository {
    async fn create(&self, vault: Vault) -> Result<()> {
        let mut vaults = self.vaults.write().await;
        if vaults.contains_key(&vault.vault_id) {
            return Err(Error::Storage(format!(
                "vault {} already exists",
                vault.vault_id
            )));
        }
        vaults.insert(vault.vault_id.clone(), vault);
        Ok(())
    }

    async fn get(&self, id: &VaultId) -> Result<Vault> {
        let vaults = self.vaults.read().await;
        vaults
            .get(id)
            .cloned()
            .ok_or_else(|| Error::VaultNotFound(id.clone()))
    }

    async fn list(&self) -> Result<Vec<Vault>> {
        let vaults = self.vaults.read().await;
        let mut out: Vec<Vault> = vaults.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn update(&self, vault: Vault) -> Result<()> {
        let mut vaults = self.vaults.write().await;
        if !vaults.contains_key(&vault.vault_id) {
            return Err(Error::VaultNotFound(vault.vault_id));
        }
        vaults.insert(vault.vault_id.clone(), vault);
        Ok(())
    }

    async fn delete(&self, id: &VaultId) -> Result<()> {
        let mut vaults = self.vaults.write().await;
        vaults
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::VaultNotFound(id.clone()))
    }
}

#[async_trait]
impl GuardianRepository for MemoryRepository {
    async fn create(&self, guardian: Guardian) -> Result<()> {
        let mut guardians = self.guardians.write().await;
        if guardians.contains_key(&guardian.guardian_id) {
            return Err(Error::Storage(format!(
                "guardian {} already exists",
                guardian.guardian_id
            )));
        }
        guardians.insert(guardian.guardian_id.clone(), guardian);
        Ok(())
    }

    async fn get(&self, id: &GuardianId) -> Result<Guardian> {
        let guardians = self.guardians.read().await;
        guardians
            .get(id)
            .cloned()
            .ok_or_else(|| Error::GuardianNotFound(id.clone()))
    }

    async fn list_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Guardian>> {
        let guardians = self.guardians.read().await;
        let mut out: Vec<Guardian> = guardians
            .values()
            .filter(|g| &g.vault_id == vault_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn update(&self, guardian: Guardian) -> Result<()> {
        let mut guardians = self.guardians.write().await;
        if !guardians.contains_key(&guardian.guardian_id) {
            return Err(Error::GuardianNotFound(guardian.guardian_id));
        }
        guardians.insert(guardian.guardian_id.clone(), guardian);
        Ok(())
    }

    async fn delete(&self, id: &GuardianId) -> Result<()> {
        let mut guardians = self.guardians.write().await;
        guardians
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::GuardianNotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quorum_types::{Round1Share, Round3Share};

    fn share(nonce: &str) -> Round1Share {
        Round1Share {
            nonce_share: nonce.to_string(),
            r_point: format!("02{}", "11".repeat(32)),
        }
    }

    async fn seeded_tx(repo: &MemoryRepository, threshold: u32) -> TransactionId {
        let tx = Transaction::new(
            VaultId::from("vault-1"),
            "ab".repeat(32),
            threshold,
            Duration::seconds(300),
        );
        let id = tx.transaction_id.clone();
        TransactionRepository::create(repo, tx).await.unwrap();
        // Open round 1 the way the coordinator does.
        repo.atomic_update(&id, &[TransactionStatus::Pending], &|tx| {
            tx.status = TransactionStatus::SigningRound1;
            Ok(())
        })
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let repo = MemoryRepository::new();
        let tx = Transaction::new(
            VaultId::from("vault-1"),
            "ab".repeat(32),
            2,
            Duration::seconds(300),
        );
        TransactionRepository::create(&repo, tx.clone()).await.unwrap();
        assert!(matches!(
            TransactionRepository::create(&repo, tx).await,
            Err(Error::DuplicateTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_append_counts_and_completes() {
        let repo = MemoryRepository::new();
        let id = seeded_tx(&repo, 2).await;

        let first = repo
            .append_round_submission(
                &id,
                &GuardianId::from("g1"),
                RoundSubmission::Round1(share("0a")),
            )
            .await
            .unwrap();
        assert_eq!(first.count, 1);
        assert!(!first.completed_round);

        let second = repo
            .append_round_submission(
                &id,
                &GuardianId::from("g2"),
                RoundSubmission::Round1(share("0b")),
            )
            .await
            .unwrap();
        assert_eq!(second.count, 2);
        assert!(second.completed_round);

        let tx = TransactionRepository::get(&repo, &id).await.unwrap();
        assert_eq!(
            tx.participating_guardians,
            vec![GuardianId::from("g1"), GuardianId::from("g2")]
        );
    }

    #[tokio::test]
    async fn test_append_is_idempotent_but_rejects_conflicts() {
        let repo = MemoryRepository::new();
        let id = seeded_tx(&repo, 2).await;
        let g1 = GuardianId::from("g1");

        repo.append_round_submission(&id, &g1, RoundSubmission::Round1(share("0a")))
            .await
            .unwrap();

        let replay = repo
            .append_round_submission(&id, &g1, RoundSubmission::Round1(share("0a")))
            .await
            .unwrap();
        assert!(replay.idempotent_replay);
        assert!(!replay.completed_round);

        let conflict = repo
            .append_round_submission(&id, &g1, RoundSubmission::Round1(share("0c")))
            .await;
        assert!(matches!(conflict, Err(Error::DuplicateConflict { round: 1, .. })));

        // The conflicting attempt must not have mutated anything.
        let tx = TransactionRepository::get(&repo, &id).await.unwrap();
        assert_eq!(tx.round1_data[&g1].nonce_share, "0a");
    }

    #[tokio::test]
    async fn test_append_rejects_stragglers_once_frozen() {
        let repo = MemoryRepository::new();
        let id = seeded_tx(&repo, 2).await;

        for g in ["g1", "g2"] {
            repo.append_round_submission(
                &id,
                &GuardianId::from(g),
                RoundSubmission::Round1(share("0a")),
            )
            .await
            .unwrap();
        }

        let straggler = repo
            .append_round_submission(
                &id,
                &GuardianId::from("g3"),
                RoundSubmission::Round1(share("0d")),
            )
            .await;
        assert!(matches!(straggler, Err(Error::NotParticipating { .. })));
    }

    #[tokio::test]
    async fn test_round3_requires_membership_and_phase() {
        let repo = MemoryRepository::new();
        let id = seeded_tx(&repo, 1).await;
        let g1 = GuardianId::from("g1");

        // Round 3 before the round is open.
        let early = repo
            .append_round_submission(
                &id,
                &g1,
                RoundSubmission::Round3(Round3Share {
                    signature_share: "0f".to_string(),
                }),
            )
            .await;
        assert!(matches!(early, Err(Error::WrongPhase { round: 3, .. })));

        repo.append_round_submission(&id, &g1, RoundSubmission::Round1(share("0a")))
            .await
            .unwrap();
        repo.atomic_update(&id, &[TransactionStatus::SigningRound1], &|tx| {
            tx.status = TransactionStatus::SigningRound3;
            Ok(())
        })
        .await
        .unwrap();

        let outsider = repo
            .append_round_submission(
                &id,
                &GuardianId::from("g9"),
                RoundSubmission::Round3(Round3Share {
                    signature_share: "0f".to_string(),
                }),
            )
            .await;
        assert!(matches!(outsider, Err(Error::NotParticipating { .. })));
    }

    #[tokio::test]
    async fn test_atomic_update_guards_status() {
        let repo = MemoryRepository::new();
        let id = seeded_tx(&repo, 2).await;

        let conflict = repo
            .atomic_update(&id, &[TransactionStatus::Pending], &|tx| {
                tx.status = TransactionStatus::Cancelled;
                Ok(())
            })
            .await;
        assert!(matches!(
            conflict,
            Err(Error::ConflictingStatus {
                actual: TransactionStatus::SigningRound1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_list_expired_skips_terminal() {
        let repo = MemoryRepository::new();
        let mut tx = Transaction::new(
            VaultId::from("vault-1"),
            "ab".repeat(32),
            2,
            Duration::seconds(-1),
        );
        tx.status = TransactionStatus::Cancelled;
        TransactionRepository::create(&repo, tx).await.unwrap();

        let expired_tx = Transaction::new(
            VaultId::from("vault-1"),
            "cd".repeat(32),
            2,
            Duration::seconds(-1),
        );
        let expired_id = expired_tx.transaction_id.clone();
        TransactionRepository::create(&repo, expired_tx).await.unwrap();

        let expired = repo.list_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].transaction_id, expired_id);
    }
}
