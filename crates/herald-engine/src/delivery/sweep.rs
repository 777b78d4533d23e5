//! Scheduled background loops: retry/ack sweep and expired-message cleanup.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::DeliveryEngine;

/// Spawn the retry and cleanup loops. Both stop when `shutdown` fires.
pub fn spawn_sweeps(
    engine: Arc<DeliveryEngine>,
    retry_interval_ms: u64,
    cleanup_interval_ms: u64,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let retry_engine = Arc::clone(&engine);
    let retry_shutdown = shutdown.clone();
    let retry = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(retry_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = retry_shutdown.cancelled() => break,
                _ = tick.tick() => retry_engine.run_retry_sweep().await,
            }
        }
        tracing::debug!("retry sweep stopped");
    });

    let cleanup = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(cleanup_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => engine.run_cleanup().await,
            }
        }
        tracing::debug!("cleanup sweep stopped");
    });

    vec![retry, cleanup]
}
