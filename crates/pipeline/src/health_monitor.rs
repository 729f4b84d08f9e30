//! Periodic worker health probing.
//!
//! Probes every enabled worker on a fixed interval so UNKNOWN workers get
//! their first verdict and UNHEALTHY ones recover without operator action.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::worker_pool::WorkerPool;

/// Run the health monitor loop until `cancel` is triggered. The first
/// round runs immediately.
pub async fn run(workers: Arc<WorkerPool>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Worker health monitor started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Worker health monitor stopping");
                break;
            }
            _ = ticker.tick() => {
                let healthy = workers.test_all().await;
                tracing::debug!(healthy, "Health check round complete");
            }
        }
    }
}
