//! Guardian administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use quorum_types::{Guardian, GuardianId, GuardianStatus, VaultId};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateGuardianRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateGuardianRequest {
    pub name: Option<String>,
    pub status: Option<GuardianStatus>,
    pub share_id: Option<String>,
}

/// POST /api/v1/vaults/:vault_id/guardians
pub async fn create_guardian(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(payload): Json<CreateGuardianRequest>,
) -> ApiResult<Json<Guardian>> {
    let vault_id = VaultId::from(vault_id);
    let mut vault = state.vaults.get(&vault_id).await?;
    if vault.guardian_ids.len() >= vault.total_guardians as usize {
        return Err(ApiError::Conflict(format!(
            "vault {} already has {} guardians",
            vault_id, vault.total_guardians
        )));
    }

    let guardian = Guardian {
        guardian_id: GuardianId(Uuid::new_v4().to_string()),
        vault_id: vault_id.clone(),
        name: payload.name,
        status: GuardianStatus::Enrolled,
        share_id: None,
        created_at: Utc::now(),
    };
    state.guardians.create(guardian.clone()).await?;

    vault.guardian_ids.push(guardian.guardian_id.clone());
    state.vaults.update(vault).await?;

    Ok(Json(guardian))
}

/// GET /api/v1/vaults/:vault_id/guardians
pub async fn list_vault_guardians(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> ApiResult<Json<Vec<Guardian>>> {
    let vault_id = VaultId::from(vault_id);
    // Surface a 404 for unknown vaults rather than an empty list.
    state.vaults.get(&vault_id).await?;
    Ok(Json(state.guardians.list_by_vault(&vault_id).await?))
}

/// GET /api/v1/guardians/:guardian_id
pub async fn get_guardian(
    State(state): State<AppState>,
    Path(guardian_id): Path<String>,
) -> ApiResult<Json<Guardian>> {
    let guardian = state.guardians.get(&GuardianId::from(guardian_id)).await?;
    Ok(Json(guardian))
}

/// PATCH /api/v1/guardians/:guardian_id
pub async fn update_guardian(
    State(state): State<AppState>,
    Path(guardian_id): Path<String>,
    Json(payload): Json<UpdateGuardianRequest>,
) -> ApiResult<Json<Guardian>> {
    let mut guardian = state.guardians.get(&GuardianId::from(guardian_id)).await?;

    if let Some(name) = payload.name {
        guardian.name = name;
    }
    if let Some(status) = payload.status {
        guardian.status = status;
    }
    if let Some(share_id) = payload.share_id {
        guardian.share_id = Some(share_id);
    }

    state.guardians.update(guardian.clone()).await?;
    Ok(Json(guardian))
}

/// DELETE /api/v1/guardians/:guardian_id
pub async fn delete_guardian(
    State(state): State<AppState>,
    Path(guardian_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let guardian_id = GuardianId::from(guardian_id);
    let guardian = state.guardians.get(&guardian_id).await?;

    state.guardians.delete(&guardian_id).await?;

    // Drop the membership entry as well; a missing vault is tolerated.
    if let Ok(mut vault) = state.vaults.get(&guardian.vault_id).await {
        vault.guardian_ids.retain(|g| g != &guardian_id);
        state.vaults.update(vault).await?;
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}
