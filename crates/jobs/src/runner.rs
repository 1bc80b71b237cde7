use std::sync::Arc;

use tracing::info;

use crate::{DiscoveryRefreshJob, LoopCheckJob};

/// Central orchestrator for the background jobs. Register jobs through
/// the builder, then call `start` once.
pub struct JobRunner {
    refresh: Option<DiscoveryRefreshJob>,
    loop_check: Option<LoopCheckJob>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            refresh: None,
            loop_check: None,
        }
    }

    pub fn with_discovery_refresh(mut self, job: DiscoveryRefreshJob) -> Self {
        self.refresh = Some(job);
        self
    }

    pub fn with_loop_check(mut self, job: LoopCheckJob) -> Self {
        self.loop_check = Some(job);
        self
    }

    pub async fn start(self) {
        info!("Starting background job runner");

        if let Some(job) = self.refresh {
            Arc::new(job).start().await;
        }
        if let Some(job) = self.loop_check {
            Arc::new(job).start().await;
        }

        info!("All background jobs started");
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}
