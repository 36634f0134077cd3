//! HTTP and WebSocket surface of the signing coordinator.
//!
//! - Administrative REST endpoints for vaults, guardians, and ceremonies
//! - The guardian-facing WebSocket signing protocol at `/ws`
//! - CORS middleware and request tracing
//! - Centralized error-to-status-code mapping

use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Create and configure the router with all endpoints.
///
/// `cors_origins` restricts cross-origin access; an empty list means
/// permissive (development mode).
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring unparseable CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let api_v1 = Router::new()
        // Vault endpoints
        .route(
            "/vaults",
            post(routes::vaults::create_vault).get(routes::vaults::list_vaults),
        )
        .route(
            "/vaults/:vault_id",
            get(routes::vaults::get_vault)
                .patch(routes::vaults::update_vault)
                .delete(routes::vaults::delete_vault),
        )
        // Guardian endpoints
        .route(
            "/vaults/:vault_id/guardians",
            post(routes::guardians::create_guardian).get(routes::guardians::list_vault_guardians),
        )
        .route(
            "/guardians/:guardian_id",
            get(routes::guardians::get_guardian)
                .patch(routes::guardians::update_guardian)
                .delete(routes::guardians::delete_guardian),
        )
        // Ceremony endpoints
        .route(
            "/vaults/:vault_id/transactions",
            post(routes::transactions::create_transaction)
                .get(routes::transactions::list_vault_transactions),
        )
        .route(
            "/transactions/:transaction_id",
            get(routes::transactions::get_transaction)
                .delete(routes::transactions::cancel_transaction),
        )
        .route(
            "/transactions/:transaction_id/status",
            get(routes::transactions::get_transaction_status),
        );

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/v1", api_v1)
        // Guardian signing protocol
        .route("/ws", get(ws::ws_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Start the server on the specified address.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    cors_origins: &[String],
) -> anyhow::Result<()> {
    let app = create_router(state, cors_origins);

    info!("starting coordinator server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
