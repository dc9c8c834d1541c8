//! Background job: garbage-collect expired tokens.
//!
//! Expired tokens are already permanently invalid; this only bounds table
//! growth. Rows are kept for a grace period so recent expiries stay visible
//! for audit. Disabled tokens are never reaped here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::manager::TokenManager;

/// Spawn the background reaper. Call this once at startup.
pub fn spawn(manager: Arc<TokenManager>, every: Duration, grace: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = manager.reap_expired(grace).await {
                tracing::error!("token reaper failed: {}", e);
            }
        }
    })
}
