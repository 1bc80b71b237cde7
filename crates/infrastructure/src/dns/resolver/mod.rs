pub mod doh;
pub mod doq;
pub mod dot;
#[cfg(feature = "doh3")]
pub(crate) mod h3;
pub mod legacy;
mod tls;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use hearth_dns_application::{QueryContext, Resolver};
use hearth_dns_domain::{ProxyError, ResolverType, UpstreamConfig};
use hickory_proto::op::Message;

pub use tls::tls_client_config;

/// Enum-dispatched resolver, one variant per wire protocol.
pub enum UpstreamResolver {
    Legacy(legacy::LegacyResolver),
    Dot(dot::DotResolver),
    Doh(doh::DohResolver),
    Doq(doq::DoqResolver),
}

impl UpstreamResolver {
    /// Build the resolver variant matching the upstream's type. The
    /// config must have been initialized.
    pub fn new(uc: Arc<UpstreamConfig>) -> Result<Self, ProxyError> {
        if uc.uid().is_empty() {
            return Err(ProxyError::ConfigInvalid(format!(
                "upstream {:?} used before init",
                uc.name
            )));
        }
        Ok(match uc.resolver_type {
            ResolverType::Legacy => Self::Legacy(legacy::LegacyResolver::new(uc)),
            ResolverType::Dot => Self::Dot(dot::DotResolver::new(uc)),
            ResolverType::Doh | ResolverType::Doh3 => Self::Doh(doh::DohResolver::new(uc)),
            ResolverType::Doq => Self::Doq(doq::DoqResolver::new(uc)?),
        })
    }
}

#[async_trait]
impl Resolver for UpstreamResolver {
    async fn resolve(&self, query: &Message, ctx: &QueryContext) -> Result<Message, ProxyError> {
        match self {
            Self::Legacy(r) => r.resolve(query, ctx).await,
            Self::Dot(r) => r.resolve(query, ctx).await,
            Self::Doh(r) => r.resolve(query, ctx).await,
            Self::Doq(r) => r.resolve(query, ctx).await,
        }
    }
}

/// Per-upstream resolver cache keyed by UID, so transport state
/// (connection pools, HTTP clients) is reused across queries. The outer
/// map is copy-on-write; each resolver manages its own connections.
#[derive(Default)]
pub struct ResolverSet {
    resolvers: ArcSwap<HashMap<String, Arc<UpstreamResolver>>>,
}

impl ResolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        uc: &Arc<UpstreamConfig>,
    ) -> Result<Arc<UpstreamResolver>, ProxyError> {
        if let Some(existing) = self.resolvers.load().get(uc.uid()) {
            return Ok(Arc::clone(existing));
        }
        let resolver = Arc::new(UpstreamResolver::new(Arc::clone(uc))?);
        self.resolvers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(uc.uid().to_string())
                .or_insert_with(|| Arc::clone(&resolver));
            next
        });
        // Another writer may have won the race; hand out whatever is
        // published now.
        Ok(self
            .resolvers
            .load()
            .get(uc.uid())
            .map(Arc::clone)
            .unwrap_or(resolver))
    }

    /// Drop the cached resolver for an upstream, forcing a rebuild on
    /// next use.
    pub fn evict(&self, uid: &str) {
        self.resolvers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(uid);
            next
        });
    }
}
