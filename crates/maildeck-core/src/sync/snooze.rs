use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::messages::MessageRepository;

/// Wakes messages whose snooze deadline has passed. One batched update per
/// tick; running twice in a row is a no-op.
pub async fn run_snooze_scheduler(
    messages: MessageRepository,
    interval_secs: u64,
    shutdown: CancellationToken,
) {
    let mut tick = interval(Duration::from_secs(interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                if shutdown.is_cancelled() {
                    break;
                }
                match messages.wake_due_snoozes(Utc::now()).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "woke snoozed messages"),
                    Err(err) => warn!(error = %err, "snooze wake failed"),
                }
            }
        }
    }

    info!("snooze scheduler stopped");
}
