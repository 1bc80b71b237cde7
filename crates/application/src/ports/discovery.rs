//! Capability ports for LAN client discovery.
//!
//! Every discovery source implements some subset of these small traits;
//! the client-info table stores one ordered list per capability and walks
//! them in priority order. A source answers with `None` (never an error)
//! when it has nothing for the given key.

use async_trait::async_trait;
use hearth_dns_domain::ProxyError;

/// Resolve a device IP from its MAC address.
#[async_trait]
pub trait IpLookup: Send + Sync {
    fn source_name(&self) -> &'static str;
    async fn lookup_ip(&self, mac: &str) -> Option<String>;
}

/// Resolve a device MAC address from its IP.
#[async_trait]
pub trait MacLookup: Send + Sync {
    fn source_name(&self) -> &'static str;
    async fn lookup_mac(&self, ip: &str) -> Option<String>;
}

#[async_trait]
pub trait HostnameByIp: Send + Sync {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String>;
}

#[async_trait]
pub trait HostnameByMac: Send + Sync {
    async fn hostname_by_mac(&self, mac: &str) -> Option<String>;
}

/// Resolve a hostname from either key.
#[async_trait]
pub trait HostnameLookup: HostnameByIp + HostnameByMac + Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Cache-only variant used while listing clients, where a source
    /// backed by live lookups must not block.
    async fn hostname_by_ip_cached(&self, ip: &str) -> Option<String> {
        self.hostname_by_ip(ip).await
    }
}

/// Enumerate every IP the source currently knows about.
pub trait IpLister: Send + Sync {
    fn source_name(&self) -> &'static str;
    fn list_ips(&self) -> Vec<String>;
}

/// Re-read the source's backing state.
#[async_trait]
pub trait Refresher: Send + Sync {
    fn source_name(&self) -> &'static str;
    async fn refresh(&self) -> Result<(), ProxyError>;
}
