//! Proxy dispatcher: the glue between cache, policy, loop guard and the
//! resolver set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_dns_application::{PolicyRouter, QueryContext};
use hearth_dns_application::Resolver as _;
use hearth_dns_domain::config::UPSTREAM_PREFIX;
use hearth_dns_domain::{ClientInfo, Config, ListenerConfig, ProxyError, UpstreamConfig};
use hickory_proto::op::Message;
use tracing::{debug, warn};

use super::cache::{CacheKey, CacheValue, DnsCache};
use super::loop_guard::LoopGuard;
use super::message::{
    ip_and_mac_from_msg, min_ttl, servfail_for, set_ttls, QuestionFingerprint,
};
use super::resolver::ResolverSet;
use crate::clientinfo::Table;

pub struct ProxyDispatcher {
    config: Arc<Config>,
    router: PolicyRouter,
    cache: DnsCache,
    loop_guard: Arc<LoopGuard>,
    resolvers: ResolverSet,
    upstreams: HashMap<String, Arc<UpstreamConfig>>,
    client_table: Option<Arc<Table>>,
}

impl ProxyDispatcher {
    pub fn new(config: Arc<Config>) -> Self {
        let loop_guard = Arc::new(LoopGuard::new());
        let mut upstreams = HashMap::new();
        for (key, uc) in &config.upstream {
            let uc = Arc::new(uc.clone());
            loop_guard.register(uc.uid());
            upstreams.insert(format!("{UPSTREAM_PREFIX}{key}"), uc);
        }
        Self {
            router: PolicyRouter::new(Arc::clone(&config)),
            cache: DnsCache::new(config.service.cache_size),
            loop_guard,
            resolvers: ResolverSet::new(),
            upstreams,
            client_table: None,
            config,
        }
    }

    /// Attach the discovery table so outbound queries carry client
    /// identity.
    pub fn with_client_table(mut self, table: Arc<Table>) -> Self {
        self.client_table = Some(table);
        self
    }

    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }

    pub fn loop_guard(&self) -> Arc<LoopGuard> {
        Arc::clone(&self.loop_guard)
    }

    /// Upstream configs keyed by listener-level id, for the probe job.
    pub fn upstream_ids(&self) -> impl Iterator<Item = (&String, &Arc<UpstreamConfig>)> + '_ {
        self.upstreams.iter()
    }

    /// Handle one inbound query end to end: loop observation, client
    /// identity, policy, then the ordered upstream walk.
    ///
    /// `BadRequest` (malformed question section) is surfaced to the
    /// caller; resolution failures degrade to SERVFAIL.
    pub async fn handle_query(
        &self,
        listener_id: &str,
        source: SocketAddr,
        query: &Message,
    ) -> Result<Message, ProxyError> {
        self.loop_guard.observe(query);

        let fingerprint = QuestionFingerprint::of(query)?;
        let client_info = self.client_info_for(source, query).await;

        let default_listener = ListenerConfig::default();
        let listener = self
            .config
            .listener
            .get(listener_id)
            .unwrap_or(&default_listener);
        let decision =
            self.router
                .upstream_for(source.ip(), listener_id, listener, &fingerprint.name);
        debug!(
            listener = listener_id,
            source = %source,
            matched = decision.matched,
            decision = %decision.description,
            "routing query"
        );

        let ctx = match client_info {
            Some(info) => QueryContext::new().with_client_info(info),
            None => QueryContext::new(),
        };
        self.proxy(&decision.upstreams, query, &fingerprint, &ctx)
            .await
    }

    /// Walk the candidate upstreams in order, honoring the loop table
    /// and the cache. Exhaustion yields SERVFAIL with the original id.
    pub async fn proxy(
        &self,
        upstream_ids: &[String],
        query: &Message,
        fingerprint: &QuestionFingerprint,
        ctx: &QueryContext,
    ) -> Result<Message, ProxyError> {
        let mut last_error: Option<ProxyError> = None;

        for id in upstream_ids {
            if ctx.expired() {
                break;
            }
            let Some(uc) = self.upstreams.get(id) else {
                warn!(upstream = %id, "unknown upstream id in policy decision");
                continue;
            };
            if self.loop_guard.is_looped(uc.uid()) {
                debug!(upstream = %id, uid = %uc.uid(), "skipping upstream flagged as loop");
                continue;
            }

            let key = CacheKey::new(fingerprint.clone(), id);
            if let Some(hit) = self.cache.get(&key) {
                debug!(upstream = %id, name = %fingerprint.name, "cache hit");
                let mut answer = hit.answer.clone();
                answer.set_id(query.id());
                set_ttls(&mut answer, hit.remaining_secs());
                return Ok(answer);
            }

            let resolver = self.resolvers.get_or_create(uc)?;
            match resolver.resolve(query, ctx).await {
                Ok(mut answer) => {
                    answer.set_id(query.id());
                    self.store(key, &answer);
                    return Ok(answer);
                }
                Err(e) if e.is_recoverable() || matches!(e, ProxyError::TransportUnavailable(_)) => {
                    warn!(upstream = %id, error = %e, "upstream failed, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match last_error {
            Some(e) => warn!(error = %e, "all upstreams failed, answering SERVFAIL"),
            None => debug!("no usable upstream, answering SERVFAIL"),
        }
        Ok(servfail_for(query))
    }

    /// One loop-probe round: a TXT query for `<uid>.test.` to every
    /// upstream, through the same resolvers live traffic uses. An
    /// upstream that forwards the probe back to us gets flagged by the
    /// listener hook.
    pub async fn check_dns_loops(&self) {
        debug!("start checking DNS loops");
        for (id, uc) in &self.upstreams {
            self.loop_guard.register(uc.uid());
            let probe = match LoopGuard::probe_message(uc.uid()) {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(upstream = %id, error = %e, "could not build loop probe");
                    continue;
                }
            };
            let resolver = match self.resolvers.get_or_create(uc) {
                Ok(resolver) => resolver,
                Err(e) => {
                    warn!(upstream = %id, error = %e, "could not perform loop check");
                    continue;
                }
            };
            let ctx = QueryContext::new().with_timeout(Duration::from_secs(5));
            if let Err(e) = resolver.resolve(&probe, &ctx).await {
                warn!(upstream = %id, error = %e, "could not send loop probe");
            }
        }
        debug!("end checking DNS loops");
    }

    fn store(&self, key: CacheKey, answer: &Message) {
        if !self.cache.is_enabled() {
            return;
        }
        let Some(ttl) = min_ttl(answer).filter(|ttl| *ttl > 0) else {
            return;
        };
        let max = self.config.service.cache_max_ttl;
        let ttl = if max > 0 { ttl.min(max) } else { ttl };
        let value = CacheValue::new(
            answer.clone(),
            Instant::now() + Duration::from_secs(u64::from(ttl)),
        );
        self.cache.add(key, value);
    }

    /// Client identity from EDNS options when present, completed from
    /// the discovery table keyed by the effective source address.
    async fn client_info_for(&self, source: SocketAddr, query: &Message) -> Option<ClientInfo> {
        let (edns_ip, edns_mac) = ip_and_mac_from_msg(query);
        let ip = edns_ip.unwrap_or_else(|| source.ip().to_string());

        let mac = match (edns_mac, &self.client_table) {
            (Some(mac), _) => mac,
            (None, Some(table)) => table.lookup_mac(&ip).await.unwrap_or_default(),
            (None, None) => String::new(),
        };
        let hostname = match &self.client_table {
            Some(table) => table.lookup_hostname(&ip, &mac).await.unwrap_or_default(),
            None => String::new(),
        };

        Some(ClientInfo {
            mac,
            ip,
            hostname,
            self_host: source.ip().is_loopback(),
        })
    }
}
