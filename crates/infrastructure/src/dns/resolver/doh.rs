//! DNS over HTTPS (RFC 8484), over HTTP/1.1+HTTP/2 and optionally
//! HTTP/3.
//!
//! Requests are GETs carrying the unpadded-base64url wire query in the
//! `dns` parameter. HTTP clients are cached per `(upstream, qtype)`
//! because some cooperative endpoints segregate pools per record type.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use hearth_dns_application::{QueryContext, Resolver};
use hearth_dns_domain::{ProxyError, ResolverType, UpstreamConfig};
use hickory_proto::op::Message;
use tracing::{debug, warn};
use url::Url;

use crate::dns::bootstrap;
use crate::dns::message::{parse_answer, serialize, single_question};

pub const CONTENT_TYPE_DNS_MESSAGE: &str = "application/dns-message";

pub const HEADER_MAC: &str = "x-cd-mac";
pub const HEADER_IP: &str = "x-cd-ip";
pub const HEADER_HOST: &str = "x-cd-host";
pub const HEADER_OS: &str = "x-cd-os";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide `<os>-<arch>-<dist>` tag sent alongside client identity.
pub fn os_tag() -> &'static str {
    static TAG: OnceLock<String> = OnceLock::new();
    TAG.get_or_init(|| {
        let os = match std::env::consts::OS {
            "windows" => "1",
            "macos" => "2",
            "linux" => "3",
            "freebsd" => "4",
            _ => "",
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "1",
            "aarch64" => "2",
            "arm" => "3",
            "x86" => "4",
            "mips" => "5",
            "mips64" => "7",
            _ => "",
        };
        format!("{os}-{arch}-{}", distribution_id())
    })
}

#[cfg(target_os = "linux")]
fn distribution_id() -> String {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                line.strip_prefix("ID=")
                    .map(|id| id.trim_matches('"').to_string())
            })
        })
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn distribution_id() -> String {
    String::new()
}

pub struct DohResolver {
    uc: Arc<UpstreamConfig>,
    is_doh3: bool,
    send_client_info: bool,
    clients: DashMap<u16, reqwest::Client>,
    #[cfg(feature = "doh3")]
    h3_pool: Option<super::h3::H3Pool>,
}

impl DohResolver {
    pub fn new(uc: Arc<UpstreamConfig>) -> Self {
        let is_doh3 = uc.resolver_type == ResolverType::Doh3;
        let send_client_info = uc.upstream_send_client_info();
        Self {
            #[cfg(feature = "doh3")]
            h3_pool: is_doh3.then(|| super::h3::H3Pool::new(Arc::clone(&uc))),
            uc,
            is_doh3,
            send_client_info,
            clients: DashMap::new(),
        }
    }

    /// Variant with HTTP/3 support withheld, mirroring builds without
    /// the `doh3` feature.
    #[cfg(feature = "doh3")]
    pub fn without_h3(uc: Arc<UpstreamConfig>) -> Self {
        let mut resolver = Self::new(uc);
        resolver.h3_pool = None;
        resolver
    }

    fn request_url(&self, query_bytes: &[u8]) -> Result<Url, ProxyError> {
        let mut url = self
            .uc
            .endpoint_url()
            .cloned()
            .ok_or_else(|| {
                ProxyError::ConfigInvalid(format!("upstream {:?} has no URL endpoint", self.uc.name))
            })?;
        let encoded = URL_SAFE_NO_PAD.encode(query_bytes);
        url.query_pairs_mut().append_pair("dns", &encoded);
        Ok(url)
    }

    /// Identity headers for cooperative providers as `(name, value)`
    /// pairs; empty fields are omitted.
    fn identity_headers(&self, ctx: &QueryContext) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if !self.send_client_info {
            return headers;
        }
        headers.push((HEADER_OS, os_tag().to_string()));
        let Some(info) = ctx.client_info.as_ref() else {
            return headers;
        };
        if !info.mac.is_empty() {
            headers.push((HEADER_MAC, info.mac.clone()));
        }
        if !info.ip.is_empty() {
            headers.push((HEADER_IP, info.ip.clone()));
        }
        if !info.hostname.is_empty() {
            headers.push((HEADER_HOST, info.hostname.clone()));
        }
        headers
    }

    async fn http_client(&self, qtype: u16) -> Result<reqwest::Client, ProxyError> {
        if let Some(client) = self.clients.get(&qtype) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30));

        // Dial through the bootstrap address so DoH works before
        // ordinary DNS does.
        if bootstrap::setup_bootstrap_ip(&self.uc).await.is_ok() {
            if let Some(ip) = self.uc.pick_bootstrap_ip() {
                let port = self
                    .uc
                    .endpoint_url()
                    .and_then(|u| u.port_or_known_default())
                    .unwrap_or(443);
                builder = builder.resolve(&self.uc.domain, std::net::SocketAddr::new(ip, port));
            }
        }

        let client = builder.build().map_err(|e| {
            ProxyError::TransportUnavailable(format!("could not build HTTP client: {e}"))
        })?;
        self.clients.insert(qtype, client.clone());
        Ok(client)
    }

    async fn resolve_h2(
        &self,
        url: Url,
        qtype: u16,
        headers: &[(&'static str, String)],
        budget: Duration,
    ) -> Result<Message, ProxyError> {
        let client = self.http_client(qtype).await?;
        let mut request = client
            .get(url)
            .header("Content-Type", CONTENT_TYPE_DNS_MESSAGE)
            .header("Accept", CONTENT_TYPE_DNS_MESSAGE)
            .timeout(budget);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::Timeout
            } else {
                // Tear down the cached client so the next call rebuilds
                // its pool.
                self.clients.remove(&qtype);
                ProxyError::UpstreamUnreachable(format!(
                    "DoH request to {:?} failed: {e}",
                    self.uc.domain
                ))
            }
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            ProxyError::UpstreamUnreachable(format!("failed to read DoH response: {e}"))
        })?;

        if !status.is_success() {
            return Err(ProxyError::UpstreamProtocolError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        parse_answer(&body)
    }
}

#[async_trait]
impl Resolver for DohResolver {
    async fn resolve(&self, query: &Message, ctx: &QueryContext) -> Result<Message, ProxyError> {
        let question = single_question(query)?;
        let qtype: u16 = question.query_type().into();
        let query_bytes = serialize(query)?;
        let url = self.request_url(&query_bytes)?;
        let headers = self.identity_headers(ctx);
        let budget = ctx.effective_budget(self.uc.query_timeout(), DEFAULT_TIMEOUT);
        if !headers.is_empty() {
            debug!(upstream = %self.uc.name, headers = headers.len(), "sending identity headers");
        }

        if self.is_doh3 {
            #[cfg(feature = "doh3")]
            {
                let Some(pool) = &self.h3_pool else {
                    return Err(ProxyError::TransportUnavailable(
                        "no HTTP/3 round-tripper available".into(),
                    ));
                };
                let answer = pool.request(url, qtype, &headers, budget).await;
                if let Err(e) = &answer {
                    warn!(upstream = %self.uc.name, error = %e, "DoH3 transport error, dropping round-tripper");
                }
                return answer;
            }
            #[cfg(not(feature = "doh3"))]
            {
                return Err(ProxyError::TransportUnavailable(
                    "built without HTTP/3 support".into(),
                ));
            }
        }

        self.resolve_h2(url, qtype, &headers, budget).await
    }
}
