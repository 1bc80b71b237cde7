use std::sync::Arc;
use std::time::Duration;

use hearth_dns_infrastructure::dns::dispatcher::ProxyDispatcher;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Sends a loop-probe round on startup and then once per minute.
pub struct LoopCheckJob {
    dispatcher: Arc<ProxyDispatcher>,
    interval_secs: u64,
    shutdown: CancellationToken,
}

impl LoopCheckJob {
    pub fn new(dispatcher: Arc<ProxyDispatcher>) -> Self {
        Self {
            dispatcher,
            interval_secs: 60,
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
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("LoopCheckJob: shutting down");
                        break;
                    }
                    // The first tick fires immediately, giving the
                    // startup probe round.
                    _ = interval.tick() => {
                        job.dispatcher.check_dns_loops().await;
                    }
                }
            }
        });
    }
}
