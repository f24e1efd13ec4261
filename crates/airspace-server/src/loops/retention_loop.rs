//! Loop that enforces geometry retention and trims the caches.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::service::OverlayService;

/// Start the retention loop.
pub async fn run_retention_loop(
    service: Arc<OverlayService>,
    sweep: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(sweep);
    // The first tick fires immediately; skip it so startup loads are not swept.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Retention loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let purged = service.purge_expired().await;
                service.prune_caches();
                if !purged.is_empty() {
                    tracing::debug!("Retention sweep purged {} airspaces", purged.len());
                }
            }
        }
    }
}
