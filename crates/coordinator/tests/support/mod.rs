//! Shared fixtures: an in-memory deployment plus simulated guardians
//! holding additive key shares.
//!
//! A simulated guardian computes its Round 3 share as
//! `s_i = k_total⁻¹ · (z · t⁻¹ + r · x_i) mod n`, which makes the
//! aggregate `Σ s_i` a textbook ECDSA `s` for the nonce `k_total` and the
//! key `Σ x_i`.

use chrono::{Duration, Utc};
use quorum_coordinator::MpcCoordinator;
use quorum_crypto::{self as crypto, ProjectivePoint, Scalar};
use quorum_sessions::SessionRegistry;
use quorum_storage::{AppendOutcome, GuardianRepository, MemoryRepository, VaultRepository};
use quorum_types::{
    Guardian, GuardianId, GuardianStatus, Result, ServerEvent, TransactionId, Vault, VaultId,
};
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Fixed 32-byte hash being signed in every scenario.
pub const MESSAGE_HASH: &str = "9c12cfdc04c74584d787ac3d23772132c18524bc7ab28dec4219b8fc5b425f70";

pub fn random_scalar() -> Scalar {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    crypto::parse_scalar_hex(&hex::encode(bytes)).expect("32 random bytes parse as a scalar")
}

pub struct SimGuardian {
    pub id: GuardianId,
    share: Scalar,
    nonce: Scalar,
}

impl SimGuardian {
    /// `(k_i, R_i)` for Round 1.
    pub fn round1_payload(&self) -> (String, String) {
        let commitment = ProjectivePoint::GENERATOR * self.nonce;
        (
            crypto::scalar_to_hex(&self.nonce),
            crypto::point_to_hex(&commitment).expect("nonce commitment is never the identity"),
        )
    }

    /// `s_i` for Round 3, from the guardian's local view of the Round 2
    /// aggregate.
    pub fn round3_share(&self, k_total_hex: &str, r_hex: &str, num_parties: u32) -> String {
        let k_total = crypto::parse_scalar_hex(k_total_hex).unwrap();
        let r = crypto::parse_scalar_hex(r_hex).unwrap();
        let z = crypto::parse_scalar_hex(MESSAGE_HASH).unwrap();
        let t_inv = crypto::mod_inverse(&Scalar::from(num_parties as u64)).unwrap();
        let k_inv = crypto::mod_inverse(&k_total).unwrap();
        let s_i = k_inv * (z * t_inv + r * self.share);
        crypto::scalar_to_hex(&s_i)
    }
}

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub registry: Arc<SessionRegistry>,
    pub coordinator: Arc<MpcCoordinator>,
    pub vault_id: VaultId,
    pub guardians: Vec<SimGuardian>,
    pub master_public_key: String,
}

impl Harness {
    /// Read the ceremony document straight from the repository.
    pub async fn repo_tx(&self, id: &TransactionId) -> quorum_types::Transaction {
        use quorum_storage::TransactionRepository;
        TransactionRepository::get(&*self.repo, id).await.unwrap()
    }

    /// A fresh coordinator over the same repository and registry, as
    /// after a process restart.
    pub fn restarted_coordinator(&self, timeout: Duration) -> MpcCoordinator {
        MpcCoordinator::new(
            self.repo.clone(),
            self.repo.clone(),
            self.repo.clone(),
            self.registry.clone(),
            timeout,
        )
    }

    /// Attach a listening session to the vault room and return its event
    /// stream.
    pub async fn observe(&self) -> UnboundedReceiver<ServerEvent> {
        let (_, receiver) = self
            .registry
            .attach(&self.vault_id, &GuardianId::from("observer"))
            .await;
        receiver
    }
}

/// Vault of `total` guardians with the given threshold; the first
/// `threshold` guardians hold additive shares of the master key.
pub async fn setup(threshold: u32, total: u32, timeout: Duration) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let registry = Arc::new(SessionRegistry::new());
    let vault_id = VaultId::from("vault-1");

    let shares: Vec<Scalar> = (0..total).map(|_| random_scalar()).collect();
    let secret = crypto::sum_scalars(shares.iter().take(threshold as usize));
    let master_public_key =
        crypto::point_to_hex(&(ProjectivePoint::GENERATOR * secret)).expect("nonzero secret");

    let mut guardians = Vec::new();
    for (i, share) in shares.iter().enumerate() {
        let id = GuardianId::from(format!("guardian-{}", i + 1));
        GuardianRepository::create(
            repo.as_ref(),
            Guardian {
                guardian_id: id.clone(),
                vault_id: vault_id.clone(),
                name: format!("Guardian {}", i + 1),
                status: GuardianStatus::Active,
                share_id: Some(format!("share-{}", i + 1)),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        guardians.push(SimGuardian {
            id,
            share: *share,
            nonce: random_scalar(),
        });
    }

    VaultRepository::create(
        repo.as_ref(),
        Vault {
            vault_id: vault_id.clone(),
            name: "test vault".to_string(),
            threshold,
            total_guardians: total,
            guardian_ids: guardians.iter().map(|g| g.id.clone()).collect(),
            master_public_key: Some(master_public_key.clone()),
            created_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    let coordinator = Arc::new(MpcCoordinator::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        registry.clone(),
        timeout,
    ));

    Harness {
        repo,
        registry,
        coordinator,
        vault_id,
        guardians,
        master_public_key,
    }
}

pub async fn submit_round1(
    coordinator: &MpcCoordinator,
    guardian: &SimGuardian,
    transaction_id: &TransactionId,
) -> Result<AppendOutcome> {
    let (nonce, point) = guardian.round1_payload();
    coordinator
        .submit_round1(transaction_id, &guardian.id, &nonce, &point)
        .await
}

/// Fetch the guardian's Round 2 view and submit its Round 3 share.
pub async fn submit_round3(
    coordinator: &MpcCoordinator,
    guardian: &SimGuardian,
    transaction_id: &TransactionId,
) -> Result<AppendOutcome> {
    let info = coordinator
        .get_round2_data(transaction_id, &guardian.id)
        .await?;
    let share = guardian.round3_share(&info.k_total, &info.r, info.num_parties);
    coordinator
        .submit_round3(transaction_id, &guardian.id, &share)
        .await
}

pub fn drain(receiver: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
