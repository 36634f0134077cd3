//! Vault administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use quorum_types::{Vault, VaultId};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateVaultRequest {
    pub name: String,
    pub threshold: u32,
    pub total_guardians: u32,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateVaultRequest {
    pub name: Option<String>,
    pub threshold: Option<u32>,
    pub master_public_key: Option<String>,
}

/// POST /api/v1/vaults
pub async fn create_vault(
    State(state): State<AppState>,
    Json(payload): Json<CreateVaultRequest>,
) -> ApiResult<Json<Vault>> {
    if payload.threshold == 0 || payload.threshold > payload.total_guardians {
        return Err(ApiError::BadRequest(format!(
            "threshold must be in 1..={}, got {}",
            payload.total_guardians, payload.threshold
        )));
    }

    let vault = Vault {
        vault_id: VaultId(Uuid::new_v4().to_string()),
        name: payload.name,
        threshold: payload.threshold,
        total_guardians: payload.total_guardians,
        guardian_ids: Vec::new(),
        master_public_key: None,
        created_at: Utc::now(),
    };
    state.vaults.create(vault.clone()).await?;
    Ok(Json(vault))
}

/// GET /api/v1/vaults
pub async fn list_vaults(State(state): State<AppState>) -> ApiResult<Json<Vec<Vault>>> {
    Ok(Json(state.vaults.list().await?))
}

/// GET /api/v1/vaults/:vault_id
pub async fn get_vault(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> ApiResult<Json<Vault>> {
    let vault = state.vaults.get(&VaultId::from(vault_id)).await?;
    Ok(Json(vault))
}

/// PATCH /api/v1/vaults/:vault_id
pub async fn update_vault(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(payload): Json<UpdateVaultRequest>,
) -> ApiResult<Json<Vault>> {
    let mut vault = state.vaults.get(&VaultId::from(vault_id)).await?;

    if let Some(name) = payload.name {
        vault.name = name;
    }
    if let Some(threshold) = payload.threshold {
        if threshold == 0 || threshold > vault.total_guardians {
            return Err(ApiError::BadRequest(format!(
                "threshold must be in 1..={}, got {}",
                vault.total_guardians, threshold
            )));
        }
        vault.threshold = threshold;
    }
    if let Some(master_public_key) = payload.master_public_key {
        vault.master_public_key = Some(master_public_key);
    }

    state.vaults.update(vault.clone()).await?;
    Ok(Json(vault))
}

/// DELETE /api/v1/vaults/:vault_id
pub async fn delete_vault(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.vaults.delete(&VaultId::from(vault_id)).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
