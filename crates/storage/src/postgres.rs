//! PostgreSQL repository backend.
//!
//! Each ceremony is one JSONB document, with `status` and `deadline`
//! lifted into columns so conditional writes and the sweeper scan stay in
//! SQL. Round appends are single guarded UPDATE statements; the
//! compare-and-set on `status` serializes every other transition.

use crate::repository::{
    apply_append, outcome_for, AppendOutcome, GuardianRepository, RoundSubmission,
    TransactionRepository, VaultRepository, CAS_MAX_ATTEMPTS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use quorum_types::{
    Error, Guardian, GuardianId, Result, SigningRound, Transaction, TransactionId,
    TransactionStatus, Vault, VaultId,
};
use tokio_postgres::NoTls;
use tracing::info;

const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

pub struct PostgresRepository {
    pool: Pool,
}

impl PostgresRepository {
    /// Connect and ensure the schema exists. `db_name` overrides the
    /// database named in the connection string.
    pub async fn new(connection_string: &str, db_name: Option<&str>) -> Result<Self> {
        let config: tokio_postgres::Config = connection_string
            .parse()
            .map_err(|e| Error::Storage(format!("invalid connection string: {}", e)))?;

        let mut cfg = Config::new();
        cfg.host = config.get_hosts().first().and_then(|h| match h {
            tokio_postgres::config::Host::Tcp(s) => Some(s.clone()),
            _ => None,
        });
        cfg.port = config.get_ports().first().copied();
        cfg.dbname = db_name
            .map(|s| s.to_string())
            .or_else(|| config.get_dbname().map(|s| s.to_string()));
        cfg.user = config.get_user().map(|s| s.to_string());
        cfg.password = config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).to_string());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Storage(format!("failed to create pool: {}", e)))?;

        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn client(&self) -> Result<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Storage(format!("failed to get client: {}", e)))
    }

    async fn init_schema(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS vaults (
                    vault_id TEXT PRIMARY KEY,
                    doc JSONB NOT NULL
                );

                CREATE TABLE IF NOT EXISTS guardians (
                    guardian_id TEXT PRIMARY KEY,
                    vault_id TEXT NOT NULL,
                    doc JSONB NOT NULL
                );

                CREATE TABLE IF NOT EXISTS transactions (
                    transaction_id TEXT PRIMARY KEY,
                    vault_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    deadline TIMESTAMPTZ NOT NULL,
                    doc JSONB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_guardians_vault_id
                    ON guardians(vault_id);
                CREATE INDEX IF NOT EXISTS idx_transactions_vault_id
                    ON transactions(vault_id);
                CREATE INDEX IF NOT EXISTS idx_transactions_status
                    ON transactions(status);
                "#,
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to init schema: {}", e)))?;

        info!("postgres schema initialized");
        Ok(())
    }
}

fn to_doc<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Storage(format!("failed to serialize: {}", e)))
}

fn from_doc<T: serde::de::DeserializeOwned>(doc: serde_json::Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| Error::Storage(format!("corrupt document: {}", e)))
}

#[async_trait]
impl TransactionRepository for PostgresRepository {
    async fn create(&self, tx: Transaction) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                r#"
                INSERT INTO transactions (transaction_id, vault_id, status, deadline, doc)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (transaction_id) DO NOTHING
                "#,
                &[
                    &tx.transaction_id.0,
                    &tx.vault_id.0,
                    &tx.status.as_str(),
                    &tx.deadline,
                    &to_doc(&tx)?,
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to insert transaction: {}", e)))?;
        if rows == 0 {
            return Err(Error::DuplicateTransaction(tx.transaction_id));
        }
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Transaction> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM transactions WHERE transaction_id = $1",
                &[&id.0],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to read transaction: {}", e)))?
            .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
        from_doc(row.get(0))
    }

    async fn list_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Transaction>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT doc FROM transactions
                WHERE vault_id = $1
                ORDER BY doc->>'created_at'
                "#,
                &[&vault_id.0],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list transactions: {}", e)))?;
        rows.into_iter().map(|row| from_doc(row.get(0))).collect()
    }

    async fn list_active_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Transaction>> {
        let client = self.client().await?;
        let terminal: Vec<String> = TERMINAL_STATUSES.iter().map(|s| s.to_string()).collect();
        let rows = client
            .query(
                r#"
                SELECT doc FROM transactions
                WHERE vault_id = $1 AND status <> ALL($2)
                ORDER BY doc->>'created_at'
                "#,
                &[&vault_id.0, &terminal],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list transactions: {}", e)))?;
        rows.into_iter().map(|row| from_doc(row.get(0))).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let client = self.client().await?;
        let terminal: Vec<String> = TERMINAL_STATUSES.iter().map(|s| s.to_string()).collect();
        let rows = client
            .query(
                r#"
                SELECT doc FROM transactions
                WHERE deadline < $1 AND status <> ALL($2)
                "#,
                &[&now, &terminal],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list expired: {}", e)))?;
        rows.into_iter().map(|row| from_doc(row.get(0))).collect()
    }

    async fn atomic_update(
        &self,
        id: &TransactionId,
        expected: &[TransactionStatus],
        mutate: &(dyn for<'a> Fn(&'a mut Transaction) -> Result<()> + Send + Sync),
    ) -> Result<Transaction> {
        let client = self.client().await?;
        for _ in 0..CAS_MAX_ATTEMPTS {
            let row = client
                .query_opt(
                    "SELECT doc FROM transactions WHERE transaction_id = $1",
                    &[&id.0],
                )
                .await
                .map_err(|e| Error::Storage(format!("failed to read transaction: {}", e)))?
                .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
            let current: Transaction = from_doc(row.get(0))?;
            if !expected.contains(&current.status) {
                return Err(Error::ConflictingStatus {
                    transaction_id: id.clone(),
                    actual: current.status,
                });
            }

            let mut updated = current.clone();
            mutate(&mut updated)?;

            let rows = client
                .execute(
                    r#"
                    UPDATE transactions
                    SET doc = $2, status = $3, deadline = $4
                    WHERE transaction_id = $1 AND status = $5
                    "#,
                    &[
                        &id.0,
                        &to_doc(&updated)?,
                        &updated.status.as_str(),
                        &updated.deadline,
                        &current.status.as_str(),
                    ],
                )
                .await
                .map_err(|e| Error::Storage(format!("failed to write transaction: {}", e)))?;
            if rows == 1 {
                return Ok(updated);
            }
            // Someone else committed between our read and write; re-read.
        }
        Err(Error::RepositoryConflict(CAS_MAX_ATTEMPTS))
    }

    async fn append_round_submission(
        &self,
        id: &TransactionId,
        guardian_id: &GuardianId,
        submission: RoundSubmission,
    ) -> Result<AppendOutcome> {
        let client = self.client().await?;
        let payload = match &submission {
            RoundSubmission::Round1(share) => to_doc(share)?,
            RoundSubmission::Round3(share) => to_doc(share)?,
        };

        for _ in 0..CAS_MAX_ATTEMPTS {
            // Optimistic single-statement path: the guards mirror
            // `apply_append`, so a hit is a fully-validated insert.
            let row = match submission.round() {
                SigningRound::Round1 => client
                    .query_opt(
                        r#"
                        UPDATE transactions
                        SET doc = jsonb_set(
                                jsonb_set(doc, ARRAY['round1_data', $2], $3),
                                '{participating_guardians}',
                                (doc->'participating_guardians') || to_jsonb($2::text))
                        WHERE transaction_id = $1
                          AND status = 'signing_round1'
                          AND NOT (doc->'round1_data') ? $2
                          AND jsonb_array_length(doc->'participating_guardians')
                              < (doc->>'signatures_required')::int
                        RETURNING doc
                        "#,
                        &[&id.0, &guardian_id.0, &payload],
                    )
                    .await,
                SigningRound::Round3 => client
                    .query_opt(
                        r#"
                        UPDATE transactions
                        SET doc = jsonb_set(doc, ARRAY['round3_data', $2], $3)
                        WHERE transaction_id = $1
                          AND status = 'signing_round3'
                          AND NOT (doc->'round3_data') ? $2
                          AND doc->'participating_guardians' @> to_jsonb($2::text)
                        RETURNING doc
                        "#,
                        &[&id.0, &guardian_id.0, &payload],
                    )
                    .await,
            }
            .map_err(|e| Error::Storage(format!("failed to append submission: {}", e)))?;

            if let Some(row) = row {
                let tx: Transaction = from_doc(row.get(0))?;
                return Ok(outcome_for(&tx, submission.round()));
            }

            // Miss: classify against the current document. `apply_append`
            // returning "write needed" means a guard raced; retry.
            let row = client
                .query_opt(
                    "SELECT doc FROM transactions WHERE transaction_id = $1",
                    &[&id.0],
                )
                .await
                .map_err(|e| Error::Storage(format!("failed to read transaction: {}", e)))?
                .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
            let mut current: Transaction = from_doc(row.get(0))?;
            if let Some(outcome) = apply_append(&mut current, guardian_id, &submission)? {
                return Ok(outcome);
            }
        }
        Err(Error::RepositoryConflict(CAS_MAX_ATTEMPTS))
    }
}

#[async_trait]
impl VaultRepository for PostgresRepository {
    async fn create(&self, vault: Vault) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                r#"
                INSERT INTO vaults (vault_id, doc)
                VALUES ($1, $2)
                ON CONFLICT (vault_id) DO NOTHING
                "#,
                &[&vault.vault_id.0, &to_doc(&vault)?],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to insert vault: {}", e)))?;
        if rows == 0 {
            return Err(Error::Storage(format!(
                "vault {} already exists",
                vault.vault_id
            )));
        }
        Ok(())
    }

    async fn get(&self, id: &VaultId) -> Result<Vault> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT doc FROM vaults WHERE vault_id = $1", &[&id.0])
            .await
            .map_err(|e| Error::Storage(format!("failed to read vault: {}", e)))?
            .ok_or_else(|| Error::VaultNotFound(id.clone()))?;
        from_doc(row.get(0))
    }

    async fn list(&self) -> Result<Vec<Vault>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT doc FROM vaults ORDER BY doc->>'created_at'", &[])
            .await
            .map_err(|e| Error::Storage(format!("failed to list vaults: {}", e)))?;
        rows.into_iter().map(|row| from_doc(row.get(0))).collect()
    }

    async fn update(&self, vault: Vault) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                "UPDATE vaults SET doc = $2 WHERE vault_id = $1",
                &[&vault.vault_id.0, &to_doc(&vault)?],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to update vault: {}", e)))?;
        if rows == 0 {
            return Err(Error::VaultNotFound(vault.vault_id));
        }
        Ok(())
    }

    async fn delete(&self, id: &VaultId) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute("DELETE FROM vaults WHERE vault_id = $1", &[&id.0])
            .await
            .map_err(|e| Error::Storage(format!("failed to delete vault: {}", e)))?;
        if rows == 0 {
            return Err(Error::VaultNotFound(id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl GuardianRepository for PostgresRepository {
    async fn create(&self, guardian: Guardian) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                r#"
                INSERT INTO guardians (guardian_id, vault_id, doc)
                VALUES ($1, $2, $3)
                ON CONFLICT (guardian_id) DO NOTHING
                "#,
                &[
                    &guardian.guardian_id.0,
                    &guardian.vault_id.0,
                    &to_doc(&guardian)?,
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to insert guardian: {}", e)))?;
        if rows == 0 {
            return Err(Error::Storage(format!(
                "guardian {} already exists",
                guardian.guardian_id
            )));
        }
        Ok(())
    }

    async fn get(&self, id: &GuardianId) -> Result<Guardian> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT doc FROM guardians WHERE guardian_id = $1",
                &[&id.0],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to read guardian: {}", e)))?
            .ok_or_else(|| Error::GuardianNotFound(id.clone()))?;
        from_doc(row.get(0))
    }

    async fn list_by_vault(&self, vault_id: &VaultId) -> Result<Vec<Guardian>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT doc FROM guardians
                WHERE vault_id = $1
                ORDER BY doc->>'created_at'
                "#,
                &[&vault_id.0],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list guardians: {}", e)))?;
        rows.into_iter().map(|row| from_doc(row.get(0))).collect()
    }

    async fn update(&self, guardian: Guardian) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute(
                "UPDATE guardians SET doc = $3, vault_id = $2 WHERE guardian_id = $1",
                &[
                    &guardian.guardian_id.0,
                    &guardian.vault_id.0,
                    &to_doc(&guardian)?,
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to update guardian: {}", e)))?;
        if rows == 0 {
            return Err(Error::GuardianNotFound(guardian.guardian_id));
        }
        Ok(())
    }

    async fn delete(&self, id: &GuardianId) -> Result<()> {
        let client = self.client().await?;
        let rows = client
            .execute("DELETE FROM guardians WHERE guardian_id = $1", &[&id.0])
            .await
            .map_err(|e| Error::Storage(format!("failed to delete guardian: {}", e)))?;
        if rows == 0 {
            return Err(Error::GuardianNotFound(id.clone()));
        }
        Ok(())
    }
}
