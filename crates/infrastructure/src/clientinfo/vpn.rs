//! Virtual-interface client table, populated by external integrations
//! (VPN servers and the like) rather than passive discovery.

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_dns_application::{HostnameByIp, HostnameByMac, HostnameLookup, IpLister, MacLookup};
use hearth_dns_domain::ClientInfo;

pub const SOURCE_NAME: &str = "vpn";

#[derive(Default)]
pub struct VpnSource {
    mac_by_ip: DashMap<String, String>,
    ip_to_name: DashMap<String, String>,
}

impl VpnSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one VPN client.
    pub fn store(&self, info: &ClientInfo) {
        if info.ip.is_empty() {
            return;
        }
        self.mac_by_ip.insert(info.ip.clone(), info.mac.clone());
        self.ip_to_name.insert(info.ip.clone(), info.hostname.clone());
    }
}

#[async_trait]
impl MacLookup for VpnSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup_mac(&self, ip: &str) -> Option<String> {
        self.mac_by_ip.get(ip).map(|v| v.clone()).filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl HostnameByIp for VpnSource {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String> {
        self.ip_to_name.get(ip).map(|v| v.clone()).filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl HostnameByMac for VpnSource {
    async fn hostname_by_mac(&self, _mac: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl HostnameLookup for VpnSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }
}

impl IpLister for VpnSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn list_ips(&self) -> Vec<String> {
        self.ip_to_name.iter().map(|e| e.key().clone()).collect()
    }
}
