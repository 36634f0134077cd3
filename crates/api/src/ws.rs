//! Signing protocol endpoint.
//!
//! A thin WebSocket adapter: wire events become coordinator calls, and
//! coordinator broadcasts flow back through the session registry into the
//! socket. The adapter holds no ceremony state of its own.
//!
//! Clients connect with `GET /ws?vaultId=...&guardianId=...`; membership
//! is verified against the guardian directory before the session attaches
//! to the vault room. Every client event is answered with an
//! acknowledgement `{ok, error?, data?}`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use quorum_types::{Error, GuardianId, Result, ServerEvent, TransactionId, VaultId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{error::ApiError, state::AppState, ApiResult};

/// Auth metadata supplied at connect time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub vault_id: VaultId,
    pub guardian_id: GuardianId,
}

/// Guardian-to-server wire events, dispatched by string name.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum ClientEvent {
    #[serde(rename = "signing:submit_round1", rename_all = "camelCase")]
    SubmitRound1 {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
        nonce_share: String,
        r_point: String,
    },

    #[serde(rename = "signing:get_round2_data", rename_all = "camelCase")]
    GetRound2Data {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
    },

    #[serde(rename = "signing:submit_round3", rename_all = "camelCase")]
    SubmitRound3 {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
        signature_share: String,
    },

    #[serde(rename = "signing:get_final_signature", rename_all = "camelCase")]
    GetFinalSignature {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
    },

    #[serde(rename = "transactions:get_pending", rename_all = "camelCase")]
    GetPendingTransactions { vault_id: VaultId },

    #[serde(rename = "transactions:get", rename_all = "camelCase")]
    GetTransaction { transaction_id: TransactionId },
}

/// Acknowledgement for one client event.
#[derive(Debug, Serialize)]
struct Ack {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl Ack {
    fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    fn error(message: String) -> Self {
        Self {
            ok: false,
            error: Some(message),
            data: None,
        }
    }
}

/// GET /ws — upgrade a verified guardian connection.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let guardian = state.guardians.get(&params.guardian_id).await?;
    if guardian.vault_id != params.vault_id || !guardian.can_sign() {
        return Err(ApiError::Forbidden(format!(
            "guardian {} may not join vault {}",
            params.guardian_id, params.vault_id
        )));
    }

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(state, params.vault_id, params.guardian_id, socket)
    }))
}

async fn handle_socket(
    state: AppState,
    vault_id: VaultId,
    guardian_id: GuardianId,
    socket: WebSocket,
) {
    let (session_id, mut events) = state.registry.attach(&vault_id, &guardian_id).await;
    info!("guardian session opened: vault={} guardian={}", vault_id, guardian_id);
    state
        .registry
        .broadcast(
            &vault_id,
            ServerEvent::GuardianConnected {
                guardian_id: guardian_id.clone(),
                vault_id: vault_id.clone(),
            },
        )
        .await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                // A closed channel means this session was replaced.
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let ack = dispatch(&state, &text).await;
                        let Ok(reply) = serde_json::to_string(&ack) else { continue };
                        if sink.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by the transport; everything else
                    // is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.detach(&vault_id, &guardian_id, session_id).await;
    info!("guardian session closed: vault={} guardian={}", vault_id, guardian_id);
    state
        .registry
        .broadcast(
            &vault_id,
            ServerEvent::GuardianDisconnected {
                guardian_id: guardian_id.clone(),
                vault_id: vault_id.clone(),
            },
        )
        .await;
}

/// Route one wire event to the coordinator and shape the acknowledgement.
async fn dispatch(state: &AppState, text: &str) -> Ack {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("unparseable client event: {}", e);
            return Ack::error(format!("unrecognized event: {}", e));
        }
    };

    let result = handle_event(state, event).await;
    match result {
        Ok(data) => Ack::ok(data),
        Err(e) => {
            warn!("client event rejected: {}", e);
            Ack::error(e.to_string())
        }
    }
}

async fn handle_event(state: &AppState, event: ClientEvent) -> Result<serde_json::Value> {
    match event {
        ClientEvent::SubmitRound1 {
            transaction_id,
            guardian_id,
            nonce_share,
            r_point,
        } => {
            let outcome = state
                .coordinator
                .submit_round1(&transaction_id, &guardian_id, &nonce_share, &r_point)
                .await?;
            Ok(json!({
                "count": outcome.count,
                "completedRound": outcome.completed_round,
            }))
        }
        ClientEvent::GetRound2Data {
            transaction_id,
            guardian_id,
        } => {
            let info = state
                .coordinator
                .get_round2_data(&transaction_id, &guardian_id)
                .await?;
            to_value(&info)
        }
        ClientEvent::SubmitRound3 {
            transaction_id,
            guardian_id,
            signature_share,
        } => {
            let outcome = state
                .coordinator
                .submit_round3(&transaction_id, &guardian_id, &signature_share)
                .await?;
            Ok(json!({
                "count": outcome.count,
                "completedRound": outcome.completed_round,
            }))
        }
        ClientEvent::GetFinalSignature {
            transaction_id,
            guardian_id,
        } => {
            let signature = state
                .coordinator
                .get_final_signature(&transaction_id, &guardian_id)
                .await?;
            to_value(&signature)
        }
        ClientEvent::GetPendingTransactions { vault_id } => {
            let pending = state.transactions.list_active_by_vault(&vault_id).await?;
            to_value(&pending)
        }
        ClientEvent::GetTransaction { transaction_id } => {
            let tx = state.transactions.get(&transaction_id).await?;
            to_value(&tx)
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Transport(e.to_string()))
}
