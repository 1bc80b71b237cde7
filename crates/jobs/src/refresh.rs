use std::sync::Arc;
use std::time::Duration;

use hearth_dns_infrastructure::clientinfo::Table;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Calls `refresh` on every discovery source at a fixed cadence.
/// Shutdown also releases the mDNS listener held by the table.
pub struct DiscoveryRefreshJob {
    table: Arc<Table>,
    interval_secs: u64,
    shutdown: CancellationToken,
}

impl DiscoveryRefreshJob {
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            interval_secs: 300,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn start(self: Arc<Self>) {
        let job = Arc::clone(&self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(job.interval_secs));
            // The first tick fires immediately; sources were refreshed
            // during table init already.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("DiscoveryRefreshJob: shutting down");
                        job.table.shutdown();
                        break;
                    }
                    _ = interval.tick() => {
                        job.table.refresh_all().await;
                    }
                }
            }
        });
    }
}
