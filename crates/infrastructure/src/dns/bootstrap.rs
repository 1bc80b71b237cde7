//! Bootstrap resolution: turning an upstream's domain into dialable IPs
//! before ordinary DNS is available.
//!
//! System nameservers are consulted first, then a small built-in list of
//! well-known resolvers; the first source that yields an address wins.
//! Results are cached on the upstream config.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hearth_dns_domain::{ProxyError, UpstreamConfig};
use hickory_proto::rr::{RData, RecordType};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::message::{new_query, parse_answer, serialize};

const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Fallback resolvers consulted when the system ones are unusable.
const WELL_KNOWN_RESOLVERS: &[&str] = &["8.8.8.8", "8.8.4.4", "1.1.1.1", "1.0.0.1", "9.9.9.9"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ensure the upstream has at least one bootstrap IP, learning one from
/// the bootstrap resolver chain if necessary.
pub async fn setup_bootstrap_ip(uc: &UpstreamConfig) -> Result<(), ProxyError> {
    if !uc.bootstrap_ips().is_empty() {
        return Ok(());
    }
    let resolved = resolve_domain(&uc.domain).await?;
    debug!(domain = %uc.domain, ips = ?resolved, "bootstrap addresses learned");
    uc.store_bootstrap_ips(resolved);
    Ok(())
}

/// Resolve a domain through system nameservers, then the well-known
/// list, returning as soon as one source yields an address. At most one
/// IPv4 and one IPv6 address are kept.
pub async fn resolve_domain(domain: &str) -> Result<Vec<IpAddr>, ProxyError> {
    if let Ok(ip) = domain.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let mut servers = system_nameservers().await;
    for well_known in WELL_KNOWN_RESOLVERS {
        if let Ok(ip) = well_known.parse() {
            if !servers.contains(&ip) {
                servers.push(ip);
            }
        }
    }

    for server in servers {
        match query_addresses(server, domain).await {
            Ok(ips) if !ips.is_empty() => return Ok(limit_per_family(ips)),
            Ok(_) => continue,
            Err(e) => {
                debug!(server = %server, error = %e, "bootstrap probe failed");
                continue;
            }
        }
    }

    Err(ProxyError::UpstreamUnreachable(format!(
        "could not bootstrap {domain:?} through any resolver"
    )))
}

/// Nameservers listed in resolv.conf, skipping loopback entries (they
/// are likely this very process).
pub async fn system_nameservers() -> Vec<IpAddr> {
    match tokio::fs::read_to_string(RESOLV_CONF).await {
        Ok(content) => parse_resolv_conf(&content),
        Err(e) => {
            warn!(error = %e, "could not read resolv.conf");
            Vec::new()
        }
    }
}

fn parse_resolv_conf(content: &str) -> Vec<IpAddr> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("nameserver")?;
            let ip: IpAddr = rest.trim().split('%').next()?.parse().ok()?;
            (!ip.is_loopback()).then_some(ip)
        })
        .collect()
}

async fn query_addresses(server: IpAddr, domain: &str) -> Result<Vec<IpAddr>, ProxyError> {
    let mut ips = Vec::new();
    for record_type in [RecordType::A, RecordType::AAAA] {
        match probe(server, domain, record_type).await {
            Ok(mut found) => ips.append(&mut found),
            Err(e) => debug!(server = %server, ?record_type, error = %e, "address probe failed"),
        }
    }
    Ok(ips)
}

async fn probe(
    server: IpAddr,
    domain: &str,
    record_type: RecordType,
) -> Result<Vec<IpAddr>, ProxyError> {
    let fqdn = if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{domain}.")
    };
    let query = new_query(&fqdn, record_type)?;
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
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("send to {server} failed: {e}")))?;

    let mut buf = vec![0u8; 4096];
    let len = tokio::time::timeout(PROBE_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| ProxyError::Timeout)?
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("recv from {server} failed: {e}")))?;

    let answer = parse_answer(&buf[..len])?;
    Ok(answer
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect())
}

fn limit_per_family(ips: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut v4 = None;
    let mut v6 = None;
    for ip in ips {
        match ip {
            IpAddr::V4(_) if v4.is_none() => v4 = Some(ip),
            IpAddr::V6(_) if v6.is_none() => v6 = Some(ip),
            _ => {}
        }
    }
    v4.into_iter().chain(v6).collect()
}
