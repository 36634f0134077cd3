//! Deadline sweeper.
//!
//! Ceremonies carry a wall-clock deadline; this background task
//! periodically moves the ones past it to `failed` so stalled quorums
//! do not hold participant slots forever.

use crate::coordinator::MpcCoordinator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

pub struct TimeoutSweeper {
    coordinator: Arc<MpcCoordinator>,
    /// How often expired ceremonies are looked for.
    interval: Duration,
}

impl TimeoutSweeper {
    pub fn new(coordinator: Arc<MpcCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Run the sweep loop forever. Spawn this as a background task.
    pub async fn start(self: Arc<Self>) {
        let mut interval = time::interval(self.interval);
        info!("starting timeout sweeper (interval: {:?})", self.interval);

        loop {
            interval.tick().await;
            match self.coordinator.sweep_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(swept) => info!("swept {} expired ceremonies to failed", swept),
                Err(e) => {
                    error!("timeout sweep failed: {}", e);
                    // Keep sweeping; the next tick retries.
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.start().await;
        })
    }
}
