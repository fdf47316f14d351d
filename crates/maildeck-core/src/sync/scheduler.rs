use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sync::engine::SyncEngine;

/// Drives the sync engine's three periodic ticks: incremental sync (preceded
/// by the watchdog), token refresh and retry processing. Every tick consults
/// the shutdown token before starting work; in-flight work completes.
pub async fn run_sync_engine(engine: Arc<SyncEngine>, shutdown: CancellationToken) {
    let config = engine.config().clone();
    let mut incremental = interval(Duration::from_secs(config.incremental_interval_secs));
    let mut refresh = interval(Duration::from_secs(config.token_refresh_interval_secs));
    let mut retry = interval(Duration::from_secs(config.retry_interval_secs));
    incremental.set_missed_tick_behavior(MissedTickBehavior::Delay);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = incremental.tick() => {
                if shutdown.is_cancelled() {
                    break;
                }
                engine.run_watchdog().await;
                engine.incremental_tick().await;
            }
            _ = refresh.tick() => {
                if shutdown.is_cancelled() {
                    break;
                }
                engine.refresh_due_tokens().await;
            }
            _ = retry.tick() => {
                if shutdown.is_cancelled() {
                    break;
                }
                engine.process_due_retries().await;
            }
        }
    }

    info!("sync scheduler stopped");
}
