//! Classic DNS over UDP with TCP fallback.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hearth_dns_application::{QueryContext, Resolver};
use hearth_dns_domain::{ProxyError, UpstreamConfig};
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::dns::bootstrap;
use crate::dns::message::{parse_answer, serialize};

/// Maximum UDP DNS response size with EDNS(0).
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LegacyResolver {
    uc: Arc<UpstreamConfig>,
}

impl LegacyResolver {
    pub fn new(uc: Arc<UpstreamConfig>) -> Self {
        Self { uc }
    }

    async fn target_addr(&self) -> Result<SocketAddr, ProxyError> {
        let (host, port) = self.uc.host_port();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        bootstrap::setup_bootstrap_ip(&self.uc).await?;
        let ip = self.uc.pick_bootstrap_ip().ok_or_else(|| {
            ProxyError::UpstreamUnreachable(format!("no bootstrap address for {host:?}"))
        })?;
        Ok(SocketAddr::new(ip, port))
    }

    async fn query_udp(
        &self,
        server: SocketAddr,
        query_bytes: &[u8],
        budget: Duration,
    ) -> Result<Message, ProxyError> {
        let bind: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("failed to bind UDP socket: {e}")))?;

        socket
            .send_to(query_bytes, server)
            .await
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!("failed to send UDP query to {server}: {e}"))
            })?;

        let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        let (len, from) = tokio::time::timeout(budget, socket.recv_from(&mut buf))
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| {
                ProxyError::UpstreamUnreachable(format!(
                    "failed to receive UDP response from {server}: {e}"
                ))
            })?;

        if from.ip() != server.ip() {
            warn!(expected = %server, received_from = %from, "UDP response from unexpected source");
        }

        parse_answer(&buf[..len])
    }

    async fn query_tcp(
        &self,
        server: SocketAddr,
        query_bytes: &[u8],
        budget: Duration,
    ) -> Result<Message, ProxyError> {
        let attempt = async {
            let mut stream = TcpStream::connect(server).await.map_err(|e| {
                ProxyError::UpstreamUnreachable(format!("TCP connect to {server} failed: {e}"))
            })?;
            write_prefixed(&mut stream, query_bytes).await?;
            let answer = read_prefixed(&mut stream).await?;
            parse_answer(&answer)
        };
        tokio::time::timeout(budget, attempt)
            .await
            .map_err(|_| ProxyError::Timeout)?
    }
}

#[async_trait]
impl Resolver for LegacyResolver {
    async fn resolve(&self, query: &Message, ctx: &QueryContext) -> Result<Message, ProxyError> {
        let server = self.target_addr().await?;
        let query_bytes = serialize(query)?;
        let budget = ctx.effective_budget(self.uc.query_timeout(), DEFAULT_TIMEOUT);
        let start = Instant::now();

        // Half the budget goes to UDP; a truncated answer or a UDP
        // timeout retries over TCP within whatever is left.
        let udp_budget = budget / 2;
        match self.query_udp(server, &query_bytes, udp_budget).await {
            Ok(answer) if !answer.truncated() => return Ok(answer),
            Ok(_) => {
                debug!(server = %server, "response truncated, retrying over TCP");
            }
            Err(ProxyError::Timeout) => {
                debug!(server = %server, "UDP timed out, retrying over TCP");
            }
            Err(e) => return Err(e),
        }

        let remaining = budget
            .checked_sub(start.elapsed())
            .unwrap_or(Duration::from_millis(500));
        self.query_tcp(server, &query_bytes, remaining)
            .await
            .map_err(|e| match e {
                ProxyError::Timeout => ProxyError::Timeout,
                other => ProxyError::UpstreamUnreachable(format!(
                    "both UDP and TCP failed for {server}: {other}"
                )),
            })
    }
}

/// Write a message with the standard 2-byte length prefix.
pub(crate) async fn write_prefixed<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), ProxyError> {
    let len = u16::try_from(payload.len())
        .map_err(|_| ProxyError::BadRequest("query exceeds 65535 bytes".into()))?;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("write failed: {e}")))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("write failed: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("flush failed: {e}")))?;
    Ok(())
}

/// Read a 2-byte length-prefixed message.
pub(crate) async fn read_prefixed<R: AsyncReadExt + Unpin>(
    stream: &mut R,
) -> Result<Vec<u8>, ProxyError> {
    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("read failed: {e}")))?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("read failed: {e}")))?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::message::new_query;
    use hearth_dns_domain::ResolverType;
    use hickory_proto::op::{MessageType, OpCode, ResponseCode};
    use hickory_proto::rr::RecordType;

    async fn mock_udp_server(respond_truncated: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            if let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                if let Ok(query) = Message::from_vec(&buf[..len]) {
                    let mut answer =
                        Message::new(query.id(), MessageType::Response, OpCode::Query);
                    answer.set_response_code(ResponseCode::NoError);
                    answer.set_truncated(respond_truncated);
                    for q in query.queries() {
                        answer.add_query(q.clone());
                    }
                    let bytes = serialize(&answer).unwrap();
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        });
        addr
    }

    fn upstream_for(addr: SocketAddr) -> Arc<UpstreamConfig> {
        let mut uc =
            UpstreamConfig::new("test", ResolverType::Legacy, &addr.to_string());
        uc.init().unwrap();
        Arc::new(uc)
    }

    #[tokio::test]
    async fn resolves_over_udp() {
        let addr = mock_udp_server(false).await;
        let resolver = LegacyResolver::new(upstream_for(addr));
        let query = new_query("example.com.", RecordType::A).unwrap();
        let ctx = QueryContext::new().with_timeout(Duration::from_secs(2));
        let answer = resolver.resolve(&query, &ctx).await.unwrap();
        assert_eq!(answer.id(), query.id());
        assert_eq!(answer.response_code(), ResponseCode::NoError);
    }

    #[tokio::test]
    async fn unreachable_server_fails() {
        // Reserved port on loopback with nobody listening.
        let resolver = LegacyResolver::new(upstream_for("127.0.0.1:1".parse().unwrap()));
        let query = new_query("example.com.", RecordType::A).unwrap();
        let ctx = QueryContext::new().with_timeout(Duration::from_millis(300));
        let err = resolver.resolve(&query, &ctx).await.unwrap_err();
        assert!(
            matches!(err, ProxyError::UpstreamUnreachable(_) | ProxyError::Timeout),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn prefixed_framing_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_prefixed(&mut a, b"hello").await.unwrap();
        let got = read_prefixed(&mut b).await.unwrap();
        assert_eq!(got, b"hello");
    }
}
