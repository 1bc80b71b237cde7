//! DNS over TLS (RFC 7858) with per-upstream connection pooling.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hearth_dns_application::{QueryContext, Resolver};
use hearth_dns_domain::{ProxyError, UpstreamConfig};
use hickory_proto::op::Message;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::debug;

use super::legacy::{read_prefixed, write_prefixed};
use super::tls::tls_client_config;
use crate::dns::bootstrap;
use crate::dns::message::{parse_answer, serialize};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle connections older than this are discarded instead of reused.
const MAX_IDLE: Duration = Duration::from_secs(30);

const MAX_POOLED: usize = 4;

struct IdleConn {
    stream: TlsStream<TcpStream>,
    idle_since: Instant,
}

pub struct DotResolver {
    uc: Arc<UpstreamConfig>,
    connector: TlsConnector,
    pool: Mutex<Vec<IdleConn>>,
}

impl DotResolver {
    pub fn new(uc: Arc<UpstreamConfig>) -> Self {
        let connector = TlsConnector::from(tls_client_config(&[]));
        Self {
            uc,
            connector,
            pool: Mutex::new(Vec::new()),
        }
    }

    async fn checkout(&self) -> Option<TlsStream<TcpStream>> {
        let mut pool = self.pool.lock().await;
        while let Some(conn) = pool.pop() {
            if conn.idle_since.elapsed() < MAX_IDLE {
                return Some(conn.stream);
            }
            // Expired; dropping closes it.
        }
        None
    }

    async fn checkin(&self, stream: TlsStream<TcpStream>) {
        let mut pool = self.pool.lock().await;
        if pool.len() < MAX_POOLED {
            pool.push(IdleConn {
                stream,
                idle_since: Instant::now(),
            });
        }
    }

    async fn dial(&self) -> Result<TlsStream<TcpStream>, ProxyError> {
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
        let tcp = TcpStream::connect(SocketAddr::new(ip, port))
            .await
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!("TCP connect to {ip}:{port} failed: {e}"))
            })?;
        let server_name = ServerName::try_from(self.uc.domain.clone()).map_err(|e| {
            ProxyError::ConfigInvalid(format!("invalid SNI {:?}: {e}", self.uc.domain))
        })?;
        self.connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!(
                    "TLS handshake with {:?} failed: {e}",
                    self.uc.domain
                ))
            })
    }

    async fn exchange(
        &self,
        stream: &mut TlsStream<TcpStream>,
        query_bytes: &[u8],
    ) -> Result<Message, ProxyError> {
        write_prefixed(stream, query_bytes).await?;
        let answer = read_prefixed(stream).await?;
        parse_answer(&answer)
    }
}

#[async_trait]
impl Resolver for DotResolver {
    async fn resolve(&self, query: &Message, ctx: &QueryContext) -> Result<Message, ProxyError> {
        let query_bytes = serialize(query)?;
        let budget = ctx.effective_budget(self.uc.query_timeout(), DEFAULT_TIMEOUT);

        let attempt = async {
            // A pooled connection may have gone stale; fall back to a
            // fresh dial once before giving up.
            if let Some(mut stream) = self.checkout().await {
                match self.exchange(&mut stream, &query_bytes).await {
                    Ok(answer) if answer.id() == query.id() => {
                        self.checkin(stream).await;
                        return Ok(answer);
                    }
                    Ok(_) => {
                        debug!(upstream = %self.uc.name, "pooled connection answered with stale id, redialing");
                    }
                    Err(e) => {
                        debug!(upstream = %self.uc.name, error = %e, "pooled connection failed, redialing");
                    }
                }
            }

            let mut stream = self.dial().await?;
            let answer = self.exchange(&mut stream, &query_bytes).await?;
            if answer.id() != query.id() {
                return Err(ProxyError::UpstreamProtocolError {
                    status: 0,
                    body: "answer id does not match query".into(),
                });
            }
            self.checkin(stream).await;
            Ok(answer)
        };

        tokio::time::timeout(budget, attempt)
            .await
            .map_err(|_| ProxyError::Timeout)?
    }
}
