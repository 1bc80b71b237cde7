use serde::Deserialize;

fn default_cache_size() -> usize {
    4096
}

/// Service-level knobs: discovery source toggles, cache sizing, and the
/// preferred self IP for interface seeding.
///
/// Discovery toggles are tri-state: `None` means enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub discover_dhcp: Option<bool>,
    #[serde(default)]
    pub discover_arp: Option<bool>,
    #[serde(default)]
    pub discover_mdns: Option<bool>,
    #[serde(default)]
    pub discover_ptr: Option<bool>,
    #[serde(default)]
    pub discover_hosts: Option<bool>,

    /// When set, self-discovery stops at the interface carrying this IP.
    #[serde(default)]
    pub self_ip: Option<String>,

    /// Answer-cache capacity; 0 disables caching entirely.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Upper bound in seconds for cached-answer lifetime; 0 means the
    /// answer TTL alone decides.
    #[serde(default)]
    pub cache_max_ttl: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            discover_dhcp: None,
            discover_arp: None,
            discover_mdns: None,
            discover_ptr: None,
            discover_hosts: None,
            self_ip: None,
            cache_size: default_cache_size(),
            cache_max_ttl: 0,
        }
    }
}

impl ServiceConfig {
    pub fn dhcp_enabled(&self) -> bool {
        self.discover_dhcp.unwrap_or(true)
    }

    pub fn arp_enabled(&self) -> bool {
        self.discover_arp.unwrap_or(true)
    }

    pub fn mdns_enabled(&self) -> bool {
        self.discover_mdns.unwrap_or(true)
    }

    pub fn ptr_enabled(&self) -> bool {
        self.discover_ptr.unwrap_or(true)
    }

    pub fn hosts_enabled(&self) -> bool {
        self.discover_hosts.unwrap_or(true)
    }
}
