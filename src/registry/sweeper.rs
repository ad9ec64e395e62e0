//! Background eviction of expired request records.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::store::RequestRegistry;

/// Spawn the eviction task.
///
/// Every `interval` the task removes terminal records older than
/// `max_age`. It exits when `cancel` fires.
#[must_use]
pub fn spawn_eviction_task(
    registry: Arc<RequestRegistry>,
    max_age: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("eviction task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = registry.evict_older_than(max_age);
                    debug!(removed, "eviction sweep finished");
                }
            }
        }
    })
}
