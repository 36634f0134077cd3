//! Ceremony administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use quorum_types::{GuardianId, Transaction, TransactionId, TransactionStatus, VaultId};
use serde::{Deserialize, Serialize};

use crate::{state::AppState, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    /// 32-byte hash to sign, 64 hex chars.
    pub message_hash: String,
    /// Overrides the vault threshold when set.
    #[serde(default)]
    pub signatures_required: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RoundCounts {
    pub round1: usize,
    pub round3: usize,
}

/// Condensed ceremony progress, for operators polling a transaction.
#[derive(Debug, Serialize)]
pub struct TransactionStatusResponse {
    pub status: TransactionStatus,
    pub participants: Vec<GuardianId>,
    pub round_counts: RoundCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/v1/vaults/:vault_id/transactions
pub async fn create_transaction(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(payload): Json<CreateTransactionRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .coordinator
        .create_transaction(
            &VaultId::from(vault_id),
            payload.message_hash,
            payload.signatures_required,
        )
        .await?;
    Ok(Json(tx))
}

/// GET /api/v1/vaults/:vault_id/transactions
pub async fn list_vault_transactions(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let vault_id = VaultId::from(vault_id);
    state.vaults.get(&vault_id).await?;
    Ok(Json(state.transactions.list_by_vault(&vault_id).await?))
}

/// GET /api/v1/transactions/:transaction_id
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .transactions
        .get(&TransactionId::from(transaction_id))
        .await?;
    Ok(Json(tx))
}

/// GET /api/v1/transactions/:transaction_id/status
pub async fn get_transaction_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Json<TransactionStatusResponse>> {
    let tx = state
        .transactions
        .get(&TransactionId::from(transaction_id))
        .await?;
    Ok(Json(TransactionStatusResponse {
        status: tx.status,
        participants: tx.participating_guardians.clone(),
        round_counts: RoundCounts {
            round1: tx.round1_data.len(),
            round3: tx.round3_data.len(),
        },
        error: tx.failure_reason,
    }))
}

/// DELETE /api/v1/transactions/:transaction_id — administrative cancel.
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let transaction_id = TransactionId::from(transaction_id);
    state
        .coordinator
        .cancel(&transaction_id, "cancelled by administrator")
        .await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}
