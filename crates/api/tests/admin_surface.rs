//! Administrative surface flow against the in-memory repository.

use axum::extract::{Json, Path, State};
use chrono::Duration;
use quorum_api::{routes, AppState};
use quorum_coordinator::MpcCoordinator;
use quorum_sessions::SessionRegistry;
use quorum_storage::MemoryRepository;
use quorum_types::{GuardianStatus, TransactionStatus};
use std::sync::Arc;

fn test_state() -> AppState {
    let repo = Arc::new(MemoryRepository::new());
    let registry = Arc::new(SessionRegistry::new());
    let coordinator = Arc::new(MpcCoordinator::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        registry.clone(),
        Duration::seconds(300),
    ));
    AppState::new(repo.clone(), repo.clone(), repo, registry, coordinator)
}

#[tokio::test]
async fn test_vault_guardian_transaction_lifecycle() {
    let state = test_state();

    // Create a 2-of-3 vault.
    let Json(vault) = routes::vaults::create_vault(
        State(state.clone()),
        Json(routes::vaults::CreateVaultRequest {
            name: "treasury".to_string(),
            threshold: 2,
            total_guardians: 3,
        }),
    )
    .await
    .unwrap();
    assert_eq!(vault.threshold, 2);
    assert!(vault.guardian_ids.is_empty());

    // Enroll three guardians; membership lands on the vault record.
    for i in 0..3 {
        let Json(guardian) = routes::guardians::create_guardian(
            State(state.clone()),
            Path(vault.vault_id.0.clone()),
            Json(routes::guardians::CreateGuardianRequest {
                name: format!("guardian {}", i + 1),
            }),
        )
        .await
        .unwrap();
        assert_eq!(guardian.status, GuardianStatus::Enrolled);
    }

    let Json(vault_after) = routes::vaults::get_vault(
        State(state.clone()),
        Path(vault.vault_id.0.clone()),
    )
    .await
    .unwrap();
    assert_eq!(vault_after.guardian_ids.len(), 3);

    // A fourth enrollment exceeds total_guardians.
    let overflow = routes::guardians::create_guardian(
        State(state.clone()),
        Path(vault.vault_id.0.clone()),
        Json(routes::guardians::CreateGuardianRequest {
            name: "one too many".to_string(),
        }),
    )
    .await;
    assert!(overflow.is_err());

    // Create a ceremony and read its status.
    let Json(tx) = routes::transactions::create_transaction(
        State(state.clone()),
        Path(vault.vault_id.0.clone()),
        Json(routes::transactions::CreateTransactionRequest {
            message_hash: "9c".repeat(32),
            signatures_required: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.signatures_required, 2);

    let Json(status) = routes::transactions::get_transaction_status(
        State(state.clone()),
        Path(tx.transaction_id.0.clone()),
    )
    .await
    .unwrap();
    assert_eq!(status.status, TransactionStatus::Pending);
    assert!(status.participants.is_empty());
    assert_eq!(status.round_counts.round1, 0);
    assert!(status.error.is_none());

    // Administrative cancel, visible in the status afterwards.
    routes::transactions::cancel_transaction(
        State(state.clone()),
        Path(tx.transaction_id.0.clone()),
    )
    .await
    .unwrap();

    let Json(status) = routes::transactions::get_transaction_status(
        State(state.clone()),
        Path(tx.transaction_id.0.clone()),
    )
    .await
    .unwrap();
    assert_eq!(status.status, TransactionStatus::Cancelled);
    assert_eq!(status.error.as_deref(), Some("cancelled by administrator"));

    // Cancelling again conflicts.
    let again = routes::transactions::cancel_transaction(
        State(state.clone()),
        Path(tx.transaction_id.0.clone()),
    )
    .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn test_bad_requests_are_rejected() {
    let state = test_state();

    let zero_threshold = routes::vaults::create_vault(
        State(state.clone()),
        Json(routes::vaults::CreateVaultRequest {
            name: "broken".to_string(),
            threshold: 0,
            total_guardians: 3,
        }),
    )
    .await;
    assert!(zero_threshold.is_err());

    let missing_vault = routes::transactions::create_transaction(
        State(state.clone()),
        Path("no-such-vault".to_string()),
        Json(routes::transactions::CreateTransactionRequest {
            message_hash: "9c".repeat(32),
            signatures_required: None,
        }),
    )
    .await;
    assert!(missing_vault.is_err());

    let Json(vault) = routes::vaults::create_vault(
        State(state.clone()),
        Json(routes::vaults::CreateVaultRequest {
            name: "treasury".to_string(),
            threshold: 2,
            total_guardians: 3,
        }),
    )
    .await
    .unwrap();

    // Malformed message hash.
    let bad_hash = routes::transactions::create_transaction(
        State(state.clone()),
        Path(vault.vault_id.0.clone()),
        Json(routes::transactions::CreateTransactionRequest {
            message_hash: "zz".repeat(32),
            signatures_required: None,
        }),
    )
    .await;
    assert!(bad_hash.is_err());

    // Threshold override beyond the vault size.
    let too_many = routes::transactions::create_transaction(
        State(state.clone()),
        Path(vault.vault_id.0.clone()),
        Json(routes::transactions::CreateTransactionRequest {
            message_hash: "9c".repeat(32),
            signatures_required: Some(4),
        }),
    )
    .await;
    assert!(too_many.is_err());
}
