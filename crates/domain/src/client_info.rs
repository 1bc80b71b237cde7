use serde::{Deserialize, Serialize};

/// Identity of a LAN client, attached to outbound queries for upstreams
/// that accept it and enriched from the discovery table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Lowercase colon-separated MAC address, empty if unknown.
    pub mac: String,
    /// Client IP as text, empty if unknown.
    pub ip: String,
    /// Client hostname, empty if unknown.
    pub hostname: String,
    /// True when the query originated from this host itself.
    pub self_host: bool,
}

impl ClientInfo {
    pub fn is_empty(&self) -> bool {
        self.mac.is_empty() && self.ip.is_empty() && self.hostname.is_empty()
    }
}

/// Dialect of a DHCP lease file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseFileFormat {
    Dnsmasq,
    IscDhcpd,
}

impl std::fmt::Display for LeaseFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseFileFormat::Dnsmasq => f.write_str("dnsmasq"),
            LeaseFileFormat::IscDhcpd => f.write_str("isc-dhcpd"),
        }
    }
}
