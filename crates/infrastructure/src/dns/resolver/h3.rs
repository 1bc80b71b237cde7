//! Cached HTTP/3 round-tripper for DoH3 upstreams.
//!
//! Each handle owns per-connection QUIC state; any transport error
//! disposes the whole handle and the next call rebuilds it. That is the
//! only recovery action taken here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use dashmap::DashMap;
use hearth_dns_domain::{ProxyError, UpstreamConfig};
use hickory_proto::op::Message;
use tracing::debug;
use url::Url;

use super::tls::tls_client_config;
use crate::dns::bootstrap;
use crate::dns::message::parse_answer;
use crate::dns::resolver::doh::CONTENT_TYPE_DNS_MESSAGE;

type H3SendRequest = h3::client::SendRequest<h3_quinn::OpenStreams, bytes::Bytes>;

struct H3Handle {
    send_request: H3SendRequest,
    // Keeps the client socket alive as long as the connection is cached.
    _endpoint: quinn::Endpoint,
}

pub struct H3Pool {
    uc: Arc<UpstreamConfig>,
    handles: DashMap<u16, H3Handle>,
}

impl H3Pool {
    pub fn new(uc: Arc<UpstreamConfig>) -> Self {
        Self {
            uc,
            handles: DashMap::new(),
        }
    }

    async fn send_request(&self, qtype: u16) -> Result<H3SendRequest, ProxyError> {
        if let Some(handle) = self.handles.get(&qtype) {
            return Ok(handle.send_request.clone());
        }
        let handle = self.connect().await?;
        let send_request = handle.send_request.clone();
        self.handles.insert(qtype, handle);
        Ok(send_request)
    }

    async fn connect(&self) -> Result<H3Handle, ProxyError> {
        bootstrap::setup_bootstrap_ip(&self.uc).await?;
        let ip = self.uc.pick_bootstrap_ip().ok_or_else(|| {
            ProxyError::UpstreamUnreachable(format!(
                "no bootstrap address for {:?}",
                self.uc.domain
            ))
        })?;
        let port = self
            .uc
            .endpoint_url()
            .and_then(|u| u.port_or_known_default())
            .unwrap_or(443);

        let mut tls = (*tls_client_config(&[])).clone();
        tls.alpn_protocols = vec![b"h3".to_vec()];
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

        let (mut driver, send_request) =
            h3::client::new(h3_quinn::Connection::new(connection))
                .await
                .map_err(|e| {
                    ProxyError::UpstreamUnreachable(format!("HTTP/3 setup failed: {e}"))
                })?;
        tokio::spawn(async move {
            let _ = futures::future::poll_fn(|cx| driver.poll_close(cx)).await;
        });

        debug!(domain = %self.uc.domain, %ip, port, "HTTP/3 connection established");
        Ok(H3Handle {
            send_request,
            _endpoint: endpoint,
        })
    }

    /// One GET over the cached connection. Any failure below the HTTP
    /// layer tears the connection down.
    pub async fn request(
        &self,
        url: Url,
        qtype: u16,
        headers: &[(&'static str, String)],
        budget: Duration,
    ) -> Result<Message, ProxyError> {
        let attempt = self.request_inner(url, qtype, headers);
        let result = match tokio::time::timeout(budget, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout),
        };
        if let Err(e) = &result {
            if !matches!(e, ProxyError::UpstreamProtocolError { status, .. } if *status != 0) {
                self.handles.remove(&qtype);
            }
            debug!(error = %e, "DoH3 request failed");
        }
        result
    }

    async fn request_inner(
        &self,
        url: Url,
        qtype: u16,
        headers: &[(&'static str, String)],
    ) -> Result<Message, ProxyError> {
        let mut send_request = self.send_request(qtype).await?;

        let mut builder = http::Request::builder()
            .method(http::Method::GET)
            .uri(url.as_str())
            .header("Content-Type", CONTENT_TYPE_DNS_MESSAGE)
            .header("Accept", CONTENT_TYPE_DNS_MESSAGE);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(())
            .map_err(|e| ProxyError::BadRequest(format!("could not build request: {e}")))?;

        let mut stream = send_request
            .send_request(request)
            .await
            .map_err(h3_transport_error)?;
        stream.finish().await.map_err(h3_transport_error)?;

        let response = stream.recv_response().await.map_err(h3_transport_error)?;
        let status = response.status();

        let mut body = Vec::new();
        while let Some(mut chunk) = stream.recv_data().await.map_err(h3_transport_error)? {
            let bytes = chunk.copy_to_bytes(chunk.remaining());
            body.extend_from_slice(&bytes);
        }

        if !status.is_success() {
            return Err(ProxyError::UpstreamProtocolError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        parse_answer(&body)
    }
}

fn h3_transport_error(e: h3::Error) -> ProxyError {
    ProxyError::UpstreamUnreachable(format!("HTTP/3 stream failed: {e}"))
}
