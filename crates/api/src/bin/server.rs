//! Guardian vault signing coordinator server.
//!
//! Sequences threshold-ECDSA signing ceremonies across guardian sessions.
//! The process exits nonzero only when startup configuration is invalid.

use anyhow::Result;
use quorum_api::{start_server, AppState};
use quorum_coordinator::{MpcCoordinator, TimeoutSweeper};
use quorum_sessions::SessionRegistry;
use quorum_storage::{
    GuardianRepository, MemoryRepository, PostgresRepository, TransactionRepository,
    VaultRepository,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the deadline sweeper scans for expired ceremonies.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting guardian vault coordinator");

    let config = load_config()?;

    let (transactions, vaults, guardians): (
        Arc<dyn TransactionRepository>,
        Arc<dyn VaultRepository>,
        Arc<dyn GuardianRepository>,
    ) = match &config.database_url {
        Some(url) => {
            info!("connecting to database at {}", mask_password(url));
            let repo =
                Arc::new(PostgresRepository::new(url, config.db_name.as_deref()).await?);
            info!("postgres repository initialized");
            (repo.clone(), repo.clone(), repo)
        }
        None => {
            warn!("DATABASE_URL not set; ceremonies will not survive a restart");
            let repo = Arc::new(MemoryRepository::new());
            (repo.clone(), repo.clone(), repo)
        }
    };

    let registry = Arc::new(SessionRegistry::new());
    let coordinator = Arc::new(MpcCoordinator::new(
        transactions.clone(),
        vaults.clone(),
        guardians.clone(),
        registry.clone(),
        chrono::Duration::seconds(config.transaction_timeout_seconds),
    ));

    let sweeper = Arc::new(TimeoutSweeper::new(coordinator.clone(), SWEEP_INTERVAL));
    sweeper.spawn();

    let state = AppState::new(transactions, vaults, guardians, registry, coordinator);

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port).parse()?;

    info!("server configuration:");
    info!("  bind address: {}", addr);
    info!(
        "  transaction timeout: {}s",
        config.transaction_timeout_seconds
    );
    info!("  cors origins: {:?}", config.cors_origins);

    start_server(state, addr, &config.cors_origins).await
}

#[derive(Debug)]
struct Config {
    database_url: Option<String>,
    db_name: Option<String>,
    bind_host: String,
    bind_port: u16,
    cors_origins: Vec<String>,
    transaction_timeout_seconds: i64,
}

fn load_config() -> Result<Config> {
    let database_url = std::env::var("DATABASE_URL").ok();
    let db_name = std::env::var("DB_NAME").ok();

    let bind_host = std::env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

    let bind_port = std::env::var("BIND_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .map_err(|e| anyhow::anyhow!("invalid BIND_PORT: {}", e))?;

    let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
        .map(|origins| {
            origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let transaction_timeout_seconds = std::env::var("TRANSACTION_TIMEOUT_SECONDS")
        .unwrap_or_else(|_| "300".to_string())
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("invalid TRANSACTION_TIMEOUT_SECONDS: {}", e))?;
    if transaction_timeout_seconds <= 0 {
        anyhow::bail!(
            "TRANSACTION_TIMEOUT_SECONDS must be positive, got {}",
            transaction_timeout_seconds
        );
    }

    Ok(Config {
        database_url,
        db_name,
        bind_host,
        bind_port,
        cors_origins,
        transaction_timeout_seconds,
    })
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "****");
            return masked;
        }
    }
    url.to_string()
}
