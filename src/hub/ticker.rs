//! Free-running round clock.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::Hub;

/// Spawns a task that ticks the hub every `period` until `shutdown` is
/// cancelled or the hub stops.
///
/// A tick that falls behind is skipped rather than replayed in a burst.
pub fn spawn_ticker(hub: Hub, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = hub.tick().await {
                        tracing::error!(error = %err, "round ticker stopping");
                        break;
                    }
                }
            }
        }
        tracing::debug!("round ticker stopped");
    })
}
