use std::net::IpAddr;
use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::errors::ProxyError;

/// Endpoint host suffixes of providers that accept client-identity
/// headers on DoH/DoH3 requests.
const COOPERATIVE_SUFFIXES: &[&str] = &["controld.com", "controld.dev"];

/// Wire protocol spoken to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverType {
    Legacy,
    Dot,
    Doh,
    Doh3,
    Doq,
}

impl ResolverType {
    pub fn default_port(&self) -> u16 {
        match self {
            ResolverType::Legacy => 53,
            ResolverType::Dot | ResolverType::Doq => 853,
            // HTTP endpoints keep the scheme default.
            ResolverType::Doh | ResolverType::Doh3 => 443,
        }
    }

    /// True for URL-shaped endpoints.
    pub fn is_http(&self) -> bool {
        matches!(self, ResolverType::Doh | ResolverType::Doh3)
    }
}

impl std::fmt::Display for ResolverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolverType::Legacy => "legacy",
            ResolverType::Dot => "dot",
            ResolverType::Doh => "doh",
            ResolverType::Doh3 => "doh3",
            ResolverType::Doq => "doq",
        };
        f.write_str(s)
    }
}

/// Which address families the upstream is dialed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpStack {
    Both,
    V4,
    V6,
    Split,
}

/// A configured remote resolver and the invariants attached to it.
///
/// `init` must run once before use; afterwards `domain` is non-empty and
/// `endpoint` carries a port for socket-based types.
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub resolver_type: ResolverType,
    pub endpoint: String,
    /// Explicit bootstrap IP; when absent one is learned at runtime.
    #[serde(default)]
    pub bootstrap_ip: Option<String>,
    /// SNI / URL host; derived from the endpoint when absent.
    #[serde(default)]
    pub domain: String,
    /// Per-query budget in milliseconds; 0 means the transport default.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub ip_stack: Option<IpStack>,
    /// Tri-state: unset defaults to true only for cooperative providers.
    #[serde(default)]
    pub send_client_info: Option<bool>,

    #[serde(skip)]
    uid: String,
    #[serde(skip)]
    url: Option<Url>,
    #[serde(skip)]
    initialized: bool,
    #[serde(skip)]
    bootstrap_ips: RwLock<Vec<IpAddr>>,
}

impl Clone for UpstreamConfig {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            resolver_type: self.resolver_type,
            endpoint: self.endpoint.clone(),
            bootstrap_ip: self.bootstrap_ip.clone(),
            domain: self.domain.clone(),
            timeout: self.timeout,
            ip_stack: self.ip_stack,
            send_client_info: self.send_client_info,
            uid: self.uid.clone(),
            url: self.url.clone(),
            initialized: self.initialized,
            bootstrap_ips: RwLock::new(self.bootstrap_ips()),
        }
    }
}

impl UpstreamConfig {
    pub fn new(name: &str, resolver_type: ResolverType, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            resolver_type,
            endpoint: endpoint.to_string(),
            bootstrap_ip: None,
            domain: String::new(),
            timeout: 0,
            ip_stack: None,
            send_client_info: None,
            uid: String::new(),
            url: None,
            initialized: false,
            bootstrap_ips: RwLock::new(Vec::new()),
        }
    }

    /// Normalize the endpoint, derive `domain`, compute the UID and
    /// default the IP stack. Idempotent; returns `ConfigInvalid` on a
    /// malformed endpoint.
    pub fn init(&mut self) -> Result<(), ProxyError> {
        if self.initialized {
            return Ok(());
        }

        if self.resolver_type.is_http() {
            let url = Url::parse(&self.endpoint).map_err(|e| {
                ProxyError::ConfigInvalid(format!(
                    "upstream {:?}: invalid endpoint {:?}: {e}",
                    self.name, self.endpoint
                ))
            })?;
            let host = url.host_str().ok_or_else(|| {
                ProxyError::ConfigInvalid(format!(
                    "upstream {:?}: endpoint {:?} has no host",
                    self.name, self.endpoint
                ))
            })?;
            if self.domain.is_empty() {
                self.domain = host.to_string();
            }
            self.url = Some(url);
        } else {
            let (host, port) = split_host_port(&self.endpoint);
            if host.is_empty() {
                return Err(ProxyError::ConfigInvalid(format!(
                    "upstream {:?}: endpoint {:?} has no host",
                    self.name, self.endpoint
                )));
            }
            let port = port.unwrap_or_else(|| self.resolver_type.default_port());
            self.endpoint = join_host_port(&host, port);
            if self.domain.is_empty() {
                self.domain = host;
            }
            if let Ok(ip) = self.domain.parse::<IpAddr>() {
                // Literal endpoints bootstrap themselves.
                if let Ok(mut ips) = self.bootstrap_ips.write() {
                    ips.push(ip);
                }
            }
        }

        if let Some(explicit) = &self.bootstrap_ip {
            let ip = explicit.parse::<IpAddr>().map_err(|e| {
                ProxyError::ConfigInvalid(format!(
                    "upstream {:?}: invalid bootstrap_ip {explicit:?}: {e}",
                    self.name
                ))
            })?;
            if let Ok(mut ips) = self.bootstrap_ips.write() {
                ips.insert(0, ip);
            }
        }

        if self.ip_stack.is_none() {
            self.ip_stack = Some(self.default_ip_stack());
        }

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b":");
        hasher.update(self.endpoint.as_bytes());
        let digest = hasher.finalize();
        self.uid = digest[..8].iter().map(|b| format!("{b:02x}")).collect();

        self.initialized = true;
        Ok(())
    }

    fn default_ip_stack(&self) -> IpStack {
        if self.is_cooperative() {
            return IpStack::Split;
        }
        match self.domain.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => IpStack::V6,
            _ => IpStack::Both,
        }
    }

    fn is_cooperative(&self) -> bool {
        let host = if self.resolver_type.is_http() {
            self.url
                .as_ref()
                .and_then(|u| u.host_str())
                .map(str::to_string)
                .unwrap_or_else(|| endpoint_host(&self.endpoint))
        } else {
            split_host_port(&self.endpoint).0
        };
        COOPERATIVE_SUFFIXES
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
    }

    /// Stable identifier derived from name and endpoint; labels cache
    /// entries and loop probes.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Parsed endpoint URL for HTTP-family upstreams.
    pub fn endpoint_url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// `(host, port)` of a socket-based endpoint.
    pub fn host_port(&self) -> (String, u16) {
        let (host, port) = split_host_port(&self.endpoint);
        (host, port.unwrap_or_else(|| self.resolver_type.default_port()))
    }

    /// Effective per-query budget.
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(self.timeout))
    }

    /// Whether client identity should accompany requests: the explicit
    /// setting when present, otherwise true only for cooperative
    /// providers.
    pub fn upstream_send_client_info(&self) -> bool {
        self.send_client_info.unwrap_or_else(|| self.is_cooperative())
    }

    pub fn bootstrap_ips(&self) -> Vec<IpAddr> {
        self.bootstrap_ips
            .read()
            .map(|ips| ips.clone())
            .unwrap_or_default()
    }

    /// Record resolved bootstrap addresses; explicit ones stay first.
    pub fn store_bootstrap_ips(&self, resolved: Vec<IpAddr>) {
        if let Ok(mut ips) = self.bootstrap_ips.write() {
            for ip in resolved {
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
        }
    }

    /// First bootstrap address honoring the configured IP stack.
    pub fn pick_bootstrap_ip(&self) -> Option<IpAddr> {
        let ips = self.bootstrap_ips();
        match self.ip_stack {
            Some(IpStack::V4) => ips.iter().find(|ip| ip.is_ipv4()).copied(),
            Some(IpStack::V6) => ips.iter().find(|ip| ip.is_ipv6()).copied(),
            _ => ips.first().copied(),
        }
    }
}

fn endpoint_host(endpoint: &str) -> String {
    Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Split `host[:port]`, tolerating bracketed and bare IPv6 literals.
fn split_host_port(endpoint: &str) -> (String, Option<u16>) {
    if let Some(rest) = endpoint.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host.to_string(), port);
        }
    }
    if endpoint.matches(':').count() > 1 {
        // Unbracketed IPv6 literal.
        return (endpoint.to_string(), None);
    }
    if let Some((host, port)) = endpoint.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            return (host.to_string(), Some(port));
        }
    }
    (endpoint.to_string(), None)
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_doh_derives_domain_and_keeps_endpoint() {
        let mut uc = UpstreamConfig::new("doh", ResolverType::Doh, "https://example.com?k=v");
        uc.init().unwrap();
        assert_eq!(uc.endpoint, "https://example.com?k=v");
        assert_eq!(uc.domain, "example.com");
        assert_eq!(uc.ip_stack, Some(IpStack::Both));
        assert!(!uc.uid().is_empty());
    }

    #[test]
    fn init_dot_appends_default_port() {
        let mut uc = UpstreamConfig::new("dot", ResolverType::Dot, "dns.example.org");
        uc.init().unwrap();
        assert_eq!(uc.endpoint, "dns.example.org:853");
        assert_eq!(uc.domain, "dns.example.org");
    }

    #[test]
    fn init_dot_keeps_explicit_port() {
        let mut uc = UpstreamConfig::new("dot", ResolverType::Dot, "dns.example.org:8853");
        uc.init().unwrap();
        assert_eq!(uc.endpoint, "dns.example.org:8853");
        assert_eq!(uc.host_port(), ("dns.example.org".to_string(), 8853));
    }

    #[test]
    fn init_legacy_literal_bootstraps_itself() {
        let mut uc = UpstreamConfig::new("legacy", ResolverType::Legacy, "1.2.3.4");
        uc.init().unwrap();
        assert_eq!(uc.endpoint, "1.2.3.4:53");
        assert_eq!(uc.domain, "1.2.3.4");
        assert_eq!(uc.bootstrap_ips(), vec!["1.2.3.4".parse::<IpAddr>().unwrap()]);
        assert_eq!(uc.ip_stack, Some(IpStack::Both));
    }

    #[test]
    fn init_is_idempotent() {
        let mut uc = UpstreamConfig::new("legacy", ResolverType::Legacy, "1.2.3.4");
        uc.init().unwrap();
        let first = (uc.endpoint.clone(), uc.uid().to_string(), uc.bootstrap_ips());
        uc.init().unwrap();
        assert_eq!(first, (uc.endpoint.clone(), uc.uid().to_string(), uc.bootstrap_ips()));
    }

    #[test]
    fn init_v6_literal_defaults_to_v6_stack() {
        let mut uc = UpstreamConfig::new("legacy6", ResolverType::Legacy, "2606:4700:4700::1111");
        uc.init().unwrap();
        assert_eq!(uc.endpoint, "[2606:4700:4700::1111]:53");
        assert_eq!(uc.ip_stack, Some(IpStack::V6));
    }

    #[test]
    fn cooperative_defaults() {
        let mut uc = UpstreamConfig::new("cd", ResolverType::Doh, "https://freedns.controld.com/p2");
        uc.init().unwrap();
        assert_eq!(uc.ip_stack, Some(IpStack::Split));
        assert!(uc.upstream_send_client_info());

        let mut other = UpstreamConfig::new("g", ResolverType::Doh, "https://dns.google/dns-query");
        other.init().unwrap();
        assert!(!other.upstream_send_client_info());
    }

    #[test]
    fn explicit_send_client_info_wins() {
        let mut uc = UpstreamConfig::new("cd", ResolverType::Doh, "https://freedns.controld.com/p2");
        uc.send_client_info = Some(false);
        uc.init().unwrap();
        assert!(!uc.upstream_send_client_info());

        let mut other = UpstreamConfig::new("g", ResolverType::Doh, "https://dns.google/dns-query");
        other.send_client_info = Some(true);
        other.init().unwrap();
        assert!(other.upstream_send_client_info());
    }

    #[test]
    fn uid_is_stable_and_distinct() {
        let mut a = UpstreamConfig::new("a", ResolverType::Legacy, "1.1.1.1");
        let mut b = UpstreamConfig::new("b", ResolverType::Legacy, "1.1.1.1");
        a.init().unwrap();
        b.init().unwrap();
        assert_ne!(a.uid(), b.uid());

        let mut a2 = UpstreamConfig::new("a", ResolverType::Legacy, "1.1.1.1");
        a2.init().unwrap();
        assert_eq!(a.uid(), a2.uid());
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let mut uc = UpstreamConfig::new("bad", ResolverType::Doh, "not a url");
        assert!(matches!(uc.init(), Err(ProxyError::ConfigInvalid(_))));
    }
}
