//! Reverse-DNS (PTR) discoverer backed by a private recursive resolver.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_dns_application::{HostnameByIp, HostnameByMac, HostnameLookup, IpLister, Refresher};
use hearth_dns_domain::ProxyError;
use hickory_proto::rr::{RData, RecordType};
use tokio::net::UdpSocket;
use tracing::debug;

use super::normalize_hostname;
use crate::dns::bootstrap;
use crate::dns::message::{new_query, parse_answer, serialize};

pub const SOURCE_NAME: &str = "ptr";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct PtrSource {
    /// Private recursive resolver; system nameservers are used when
    /// unset.
    nameserver: Option<IpAddr>,
    cache: DashMap<String, String>,
}

impl PtrSource {
    pub fn new(nameserver: Option<IpAddr>) -> Self {
        Self {
            nameserver,
            cache: DashMap::new(),
        }
    }

    /// `in-addr.arpa` / `ip6.arpa` name for an address.
    pub fn ip_to_reverse_domain(ip: &IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
            }
            IpAddr::V6(v6) => {
                let mut nibbles = Vec::with_capacity(32);
                for byte in v6.octets().iter().rev() {
                    nibbles.push(format!("{:x}", byte & 0x0f));
                    nibbles.push(format!("{:x}", (byte >> 4) & 0x0f));
                }
                format!("{}.ip6.arpa", nibbles.join("."))
            }
        }
    }

    /// Cache-only view, used while listing clients so an unreachable
    /// resolver cannot block the listing.
    pub fn lookup_from_cache(&self, ip: &str) -> Option<String> {
        self.cache.get(ip).map(|v| v.clone())
    }

    async fn lookup_live(&self, ip_str: &str) -> Option<String> {
        let ip: IpAddr = ip_str.parse().ok()?;
        let reverse = Self::ip_to_reverse_domain(&ip);

        let servers: Vec<IpAddr> = match self.nameserver {
            Some(server) => vec![server],
            None => bootstrap::system_nameservers().await,
        };
        for server in servers {
            match query_ptr(server, &reverse).await {
                Ok(Some(name)) => {
                    let name = normalize_hostname(&name).to_string();
                    self.cache.insert(ip_str.to_string(), name.clone());
                    return Some(name);
                }
                Ok(None) => return None,
                Err(e) => {
                    debug!(ip = ip_str, server = %server, error = %e, "PTR lookup failed");
                }
            }
        }
        None
    }
}

async fn query_ptr(server: IpAddr, reverse_domain: &str) -> Result<Option<String>, ProxyError> {
    let query = new_query(&format!("{reverse_domain}."), RecordType::PTR)?;
    let bytes = serialize(&query)?;

    let bind: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("bind failed: {e}")))?;
    socket
        .send_to(&bytes, SocketAddr::new(server, 53))
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("send failed: {e}")))?;

    let mut buf = vec![0u8; 4096];
    let len = tokio::time::timeout(LOOKUP_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| ProxyError::Timeout)?
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("recv failed: {e}")))?;

    let answer = parse_answer(&buf[..len])?;
    Ok(answer.answers().iter().find_map(|record| match record.data() {
        RData::PTR(ptr) => Some(ptr.to_utf8()),
        _ => None,
    }))
}

#[async_trait]
impl HostnameByIp for PtrSource {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String> {
        if let Some(cached) = self.lookup_from_cache(ip) {
            return Some(cached);
        }
        self.lookup_live(ip).await
    }
}

#[async_trait]
impl HostnameByMac for PtrSource {
    async fn hostname_by_mac(&self, _mac: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl HostnameLookup for PtrSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn hostname_by_ip_cached(&self, ip: &str) -> Option<String> {
        self.lookup_from_cache(ip)
    }
}

impl IpLister for PtrSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn list_ips(&self) -> Vec<String> {
        self.cache.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl Refresher for PtrSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    /// Re-resolve everything already cached; stale names survive a
    /// failed lookup.
    async fn refresh(&self) -> Result<(), ProxyError> {
        let known: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        for ip in known {
            let _ = self.lookup_live(&ip).await;
        }
        Ok(())
    }
}
