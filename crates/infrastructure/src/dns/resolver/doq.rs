//! DNS over QUIC (RFC 9250): one bidirectional stream per query over a
//! reused per-upstream connection.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_dns_application::{QueryContext, Resolver};
use hearth_dns_domain::{ProxyError, UpstreamConfig};
use hickory_proto::op::Message;
use tokio::sync::Mutex;
use tracing::debug;

use super::tls::tls_client_config;
use crate::dns::bootstrap;
use crate::dns::message::{parse_answer, serialize};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const DOQ_ALPN: &[u8] = b"doq";

pub struct DoqResolver {
    uc: Arc<UpstreamConfig>,
    state: Mutex<Option<(quinn::Endpoint, quinn::Connection)>>,
}

impl DoqResolver {
    pub fn new(uc: Arc<UpstreamConfig>) -> Result<Self, ProxyError> {
        Ok(Self {
            uc,
            state: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<quinn::Connection, ProxyError> {
        let mut state = self.state.lock().await;
        if let Some((_, conn)) = state.as_ref() {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }

        let (host, port) = self.uc.host_port();
        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                bootstrap::setup_bootstrap_ip(&self.uc).await?;
                self.uc.pick_bootstrap_ip().ok_or_else(|| {
                    ProxyError::UpstreamUnreachable(format!("no bootstrap address for {host:?}"))
                })?
            }
        };

        let mut tls = (*tls_client_config(&[])).clone();
        tls.alpn_protocols = vec![DOQ_ALPN.to_vec()];
        let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls).map_err(|e| {
            ProxyError::TransportUnavailable(format!("QUIC TLS config rejected: {e}"))
        })?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_tls));

        let bind: SocketAddr = if ip.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(|e| {
            ProxyError::TransportUnavailable(format!("could not create QUIC endpoint: {e}"))
        })?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(SocketAddr::new(ip, port), &self.uc.domain)
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!("QUIC connect setup failed: {e}"))
            })?
            .await
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!(
                    "QUIC handshake with {:?} failed: {e}",
                    self.uc.domain
                ))
            })?;

        debug!(domain = %self.uc.domain, %ip, port, "DoQ connection established");
        *state = Some((endpoint, connection.clone()));
        Ok(connection)
    }

    async fn teardown(&self) {
        *self.state.lock().await = None;
    }

    async fn exchange(&self, query_bytes: &[u8]) -> Result<Message, ProxyError> {
        let connection = self.connection().await?;
        let (mut send, mut recv) = connection.open_bi().await.map_err(|e| {
            ProxyError::UpstreamUnreachable(format!("could not open QUIC stream: {e}"))
        })?;

        let len = u16::try_from(query_bytes.len())
            .map_err(|_| ProxyError::BadRequest("query exceeds 65535 bytes".into()))?;
        send.write_all(&len.to_be_bytes())
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("QUIC write failed: {e}")))?;
        send.write_all(query_bytes)
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("QUIC write failed: {e}")))?;
        let _ = send.finish();

        let mut len_buf = [0u8; 2];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("QUIC read failed: {e}")))?;
        let mut answer = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        recv.read_exact(&mut answer)
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("QUIC read failed: {e}")))?;

        parse_answer(&answer)
    }
}

#[async_trait]
impl Resolver for DoqResolver {
    async fn resolve(&self, query: &Message, ctx: &QueryContext) -> Result<Message, ProxyError> {
        // RFC 9250 requires a zero message id on the wire.
        let mut wire_query = query.clone();
        wire_query.set_id(0);
        let query_bytes = serialize(&wire_query)?;
        let budget = ctx.effective_budget(self.uc.query_timeout(), DEFAULT_TIMEOUT);

        let result = match tokio::time::timeout(budget, self.exchange(&query_bytes)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout),
        };

        match result {
            Ok(mut answer) => {
                answer.set_id(query.id());
                Ok(answer)
            }
            Err(e) => {
                // The pooled connection may be poisoned; rebuild lazily.
                self.teardown().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_dns_domain::ResolverType;

    #[tokio::test]
    async fn unreachable_doq_upstream_fails_fast() {
        let mut uc = UpstreamConfig::new("doq", ResolverType::Doq, "127.0.0.1:1");
        uc.init().unwrap();
        let resolver = DoqResolver::new(Arc::new(uc)).unwrap();
        let query = crate::dns::message::new_query("example.com.", hickory_proto::rr::RecordType::A).unwrap();
        let ctx = QueryContext::new().with_timeout(Duration::from_millis(400));
        let err = resolver.resolve(&query, &ctx).await.unwrap_err();
        assert!(
            matches!(err, ProxyError::UpstreamUnreachable(_) | ProxyError::Timeout),
            "unexpected error: {err}"
        );
    }
}
