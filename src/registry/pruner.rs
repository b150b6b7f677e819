//! Periodic prune sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time;

use crate::registry::RouteRegistry;

/// Background task that calls [`RouteRegistry::prune`] on a fixed interval.
pub struct PruningController {
    registry: Arc<RouteRegistry>,
    interval: Duration,
}

impl PruningController {
    pub fn new(registry: Arc<RouteRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_threshold_secs = self.registry.options().stale_threshold.as_secs(),
            "Pruning controller starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be stale yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pruning controller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn sweep(&self) {
        let report = self.registry.prune(Instant::now());
        if report.suspended {
            tracing::warn!("Prune sweep suspended, message bus unavailable");
        } else if report.endpoints_removed > 0 || report.pools_removed > 0 {
            tracing::info!(
                endpoints_removed = report.endpoints_removed,
                pools_removed = report.pools_removed,
                routes = self.registry.route_count(),
                "Prune sweep complete"
            );
        } else {
            tracing::debug!(routes = self.registry.route_count(), "Prune sweep found nothing stale");
        }
    }
}
