use std::time::{Duration, Instant};

use async_trait::async_trait;
use hearth_dns_domain::{ClientInfo, ProxyError};
use hickory_proto::op::Message;

/// Per-request context carried through resolution: the deadline and the
/// identity of the client the query originated from.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub deadline: Option<Instant>,
    pub client_info: Option<ClientInfo>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = Some(info);
        self
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// The smaller of the request deadline and an upstream's own budget.
    pub fn effective_budget(&self, upstream_timeout: Option<Duration>, fallback: Duration) -> Duration {
        let base = upstream_timeout.unwrap_or(fallback);
        match self.remaining() {
            Some(remaining) => base.min(remaining),
            None => base,
        }
    }
}

/// Common contract of every upstream resolver variant.
///
/// The query must carry exactly one question; the dispatcher enforces
/// that before dispatch.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &Message, ctx: &QueryContext) -> Result<Message, ProxyError>;
}
