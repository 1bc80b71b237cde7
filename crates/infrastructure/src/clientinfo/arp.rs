//! ARP table scraper (`/proc/net/arp`).

use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_dns_application::{IpLister, IpLookup, MacLookup, Refresher};
use hearth_dns_domain::ProxyError;
use tracing::{debug, warn};

use super::is_valid_mac;

const ARP_PATH: &str = "/proc/net/arp";

pub const SOURCE_NAME: &str = "arp";

pub struct ArpSource {
    path: String,
    mac_by_ip: DashMap<String, String>,
    ip_by_mac: DashMap<String, String>,
}

impl ArpSource {
    pub fn new() -> Self {
        Self::with_path(ARP_PATH)
    }

    /// Custom table path, useful for tests.
    pub fn with_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            mac_by_ip: DashMap::new(),
            ip_by_mac: DashMap::new(),
        }
    }

    fn parse_table(&self, content: &str) {
        // Format:
        // IP address  HW type  Flags  HW address         Mask  Device
        // 192.168.1.1 0x1      0x2    aa:bb:cc:dd:ee:ff  *     eth0
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            let (ip_str, flags, mac) = (fields[0], fields[2], fields[3]);

            // 0x2 marks a complete entry.
            if flags != "0x2" || mac == "00:00:00:00:00:00" {
                continue;
            }
            if !is_valid_mac(mac) {
                warn!(ip = ip_str, mac, "invalid MAC in ARP table");
                continue;
            }
            match IpAddr::from_str(ip_str) {
                Ok(ip) => {
                    let mac = mac.to_lowercase();
                    self.mac_by_ip.insert(ip.to_string(), mac.clone());
                    self.ip_by_mac.insert(mac, ip.to_string());
                }
                Err(e) => warn!(error = %e, ip = ip_str, "invalid IP in ARP table"),
            }
        }
        debug!(entries = self.mac_by_ip.len(), "ARP table parsed");
    }
}

impl Default for ArpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Refresher for ArpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn refresh(&self) -> Result<(), ProxyError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("failed to read ARP cache: {e}")))?;
        self.parse_table(&content);
        Ok(())
    }
}

#[async_trait]
impl IpLookup for ArpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup_ip(&self, mac: &str) -> Option<String> {
        self.ip_by_mac.get(mac).map(|v| v.clone())
    }
}

#[async_trait]
impl MacLookup for ArpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup_mac(&self, ip: &str) -> Option<String> {
        self.mac_by_ip.get(ip).map(|v| v.clone())
    }
}

impl IpLister for ArpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn list_ips(&self) -> Vec<String> {
        self.mac_by_ip.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
192.168.1.50     0x1         0x0         00:11:22:33:44:55     *        eth0
192.168.1.60     0x1         0x2         00:00:00:00:00:00     *        eth0
bogus            0x1         0x2         aa:bb:cc:dd:ee:01     *        eth0
";

    #[tokio::test]
    async fn parses_complete_entries_only() {
        let source = ArpSource::new();
        source.parse_table(SAMPLE);
        assert_eq!(
            source.lookup_mac("192.168.1.1").await.as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
        // Incomplete flag.
        assert_eq!(source.lookup_mac("192.168.1.50").await, None);
        // Null MAC.
        assert_eq!(source.lookup_mac("192.168.1.60").await, None);
        assert_eq!(
            source.lookup_ip("aa:bb:cc:dd:ee:ff").await.as_deref(),
            Some("192.168.1.1")
        );
        assert_eq!(source.list_ips(), vec!["192.168.1.1".to_string()]);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let source = ArpSource::with_path("/nonexistent/arp");
        assert!(source.refresh().await.is_err());
    }
}
