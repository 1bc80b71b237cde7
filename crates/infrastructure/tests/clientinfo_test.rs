use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_dns_application::{HostnameByIp, HostnameByMac, HostnameLookup};
use hearth_dns_domain::{ClientInfo, ServiceConfig};
use hearth_dns_infrastructure::clientinfo::Table;

fn quiet_service() -> ServiceConfig {
    ServiceConfig {
        discover_dhcp: Some(false),
        discover_arp: Some(false),
        discover_mdns: Some(false),
        discover_ptr: Some(false),
        discover_hosts: Some(false),
        ..ServiceConfig::default()
    }
}

/// Fixed-answer hostname source standing in for a router-vendor hook.
struct StaticSource {
    name: &'static str,
    by_ip: HashMap<String, String>,
}

impl StaticSource {
    fn new(name: &'static str, entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            name,
            by_ip: entries
                .iter()
                .map(|(ip, host)| (ip.to_string(), host.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl HostnameByIp for StaticSource {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String> {
        self.by_ip.get(ip).cloned()
    }
}

#[async_trait]
impl HostnameByMac for StaticSource {
    async fn hostname_by_mac(&self, _mac: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl HostnameLookup for StaticSource {
    fn source_name(&self) -> &'static str {
        self.name
    }
}

#[tokio::test]
async fn earliest_source_with_an_answer_wins() {
    let table = Table::default()
        .with_custom_source(StaticSource::new(
            "first",
            &[("192.168.1.5", "from-first")],
        ))
        .with_custom_source(StaticSource::new(
            "second",
            &[("192.168.1.5", "from-second"), ("192.168.1.6", "only-second")],
        ));

    assert_eq!(
        table.lookup_hostname("192.168.1.5", "").await.as_deref(),
        Some("from-first")
    );
    assert_eq!(
        table.lookup_hostname("192.168.1.6", "").await.as_deref(),
        Some("only-second")
    );
    assert_eq!(table.lookup_hostname("192.168.1.7", "").await, None);
}

#[tokio::test]
async fn vpn_clients_are_stored_and_listed() {
    let table = Table::init(&quiet_service()).await;
    table.store_vpn_client(&ClientInfo {
        mac: "aa:bb:cc:dd:ee:ff".into(),
        ip: "10.8.0.2".into(),
        hostname: "laptop".into(),
        self_host: false,
    });

    assert_eq!(
        table.lookup_mac("10.8.0.2").await.as_deref(),
        Some("aa:bb:cc:dd:ee:ff")
    );
    assert_eq!(
        table.lookup_hostname("10.8.0.2", "").await.as_deref(),
        Some("laptop")
    );

    let clients = table.list_clients().await;
    assert_eq!(clients.len(), 1);
    let client = &clients[0];
    assert_eq!(client.ip.to_string(), "10.8.0.2");
    assert_eq!(client.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    assert_eq!(client.hostname.as_deref(), Some("laptop"));
    assert!(client.sources.contains("vpn"));
}

#[tokio::test]
async fn empty_vpn_entries_do_not_shadow_other_sources() {
    let table = Table::init(&quiet_service())
        .await
        .with_custom_source(StaticSource::new("router", &[("10.8.0.3", "fallback")]));
    table.store_vpn_client(&ClientInfo {
        mac: String::new(),
        ip: "10.8.0.3".into(),
        hostname: String::new(),
        self_host: false,
    });

    // The VPN table knows the IP but has no hostname; the later source
    // still answers.
    assert_eq!(
        table.lookup_hostname("10.8.0.3", "").await.as_deref(),
        Some("fallback")
    );
}
