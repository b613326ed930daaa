//! Channel sweeper background task.
//!
//! Ring and presence channels are created per provider on first subscribe.
//! This task periodically removes the ones whose last subscriber is gone.
//! It exits when the cancellation token is triggered.

use crate::notifications::NotificationBus;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Run the sweeper loop until `cancel_token` fires.
pub async fn start_channel_sweeper(
    bus: NotificationBus,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(target: "queue.tasks.sweeper", "Channel sweeper started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = bus.cleanup().await;
                if removed > 0 {
                    debug!(
                        target: "queue.tasks.sweeper",
                        removed = removed,
                        "Removed idle provider channels"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "queue.tasks.sweeper",
                    "Channel sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
