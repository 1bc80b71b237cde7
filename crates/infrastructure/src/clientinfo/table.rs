//! Ordered fan-in of discovery sources.
//!
//! Sources register per capability, in a fixed priority order; lookups
//! return the first non-empty answer. The priority is: hosts file, DHCP
//! leases, ARP, reverse DNS, mDNS, VPN table, then any router-vendor
//! hook installed by the embedder.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use hearth_dns_application::{HostnameLookup, IpLister, IpLookup, MacLookup, Refresher};
use hearth_dns_domain::{ClientInfo, LeaseFileFormat, ServiceConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::arp::ArpSource;
use super::dhcp::DhcpSource;
use super::hosts::HostsFileSource;
use super::mdns::MdnsSource;
use super::ptr::PtrSource;
use super::vpn::VpnSource;

/// One discovered LAN client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub sources: BTreeSet<String>,
}

#[derive(Default)]
pub struct Table {
    ip_resolvers: Vec<Arc<dyn IpLookup>>,
    mac_resolvers: Vec<Arc<dyn MacLookup>>,
    hostname_resolvers: Vec<Arc<dyn HostnameLookup>>,
    refreshers: Vec<Arc<dyn Refresher>>,
    listers: Vec<Arc<dyn IpLister>>,
    dhcp: Option<Arc<DhcpSource>>,
    vpn: Option<Arc<VpnSource>>,
    shutdown: CancellationToken,
}

impl Table {
    /// Build and initialize every enabled source. A source that fails
    /// to initialize is logged and excluded; the table stays usable.
    pub async fn init(service: &ServiceConfig) -> Self {
        let mut table = Table::default();

        if service.hosts_enabled() {
            let hosts = HostsFileSource::new();
            match hosts.init().await {
                Ok(()) => {
                    debug!("start hosts file discovery");
                    table.hostname_resolvers.push(hosts.clone());
                    table.refreshers.push(hosts);
                }
                Err(e) => warn!(error = %e, "could not init hosts file discovery"),
            }
        }

        if service.dhcp_enabled() {
            let dhcp = DhcpSource::new(service.self_ip.clone());
            match dhcp.init() {
                Ok(()) => {
                    debug!("start dhcp discovery");
                    table.ip_resolvers.push(dhcp.clone());
                    table.mac_resolvers.push(dhcp.clone());
                    table.hostname_resolvers.push(dhcp.clone());
                    table.refreshers.push(dhcp.clone());
                    table.listers.push(dhcp.clone());
                    table.dhcp = Some(dhcp);
                }
                Err(e) => warn!(error = %e, "could not init DHCP discovery"),
            }
        }

        if service.arp_enabled() {
            let arp = Arc::new(ArpSource::new());
            match Refresher::refresh(arp.as_ref()).await {
                Ok(()) => {
                    debug!("start arp discovery");
                    table.ip_resolvers.push(arp.clone());
                    table.mac_resolvers.push(arp.clone());
                    table.refreshers.push(arp.clone());
                    table.listers.push(arp);
                }
                Err(e) => warn!(error = %e, "could not init ARP discovery"),
            }
        }

        if service.ptr_enabled() {
            let ptr = Arc::new(PtrSource::new(None));
            debug!("start ptr discovery");
            table.hostname_resolvers.push(ptr.clone());
            table.refreshers.push(ptr.clone());
            table.listers.push(ptr);
        }

        if service.mdns_enabled() {
            let mdns = MdnsSource::new();
            match mdns.init(table.shutdown.clone()) {
                Ok(()) => {
                    debug!("start mdns discovery");
                    table.hostname_resolvers.push(mdns.clone());
                    table.listers.push(mdns);
                }
                Err(e) => warn!(error = %e, "could not init mDNS discovery"),
            }
        }

        let vpn = Arc::new(VpnSource::new());
        table.mac_resolvers.push(vpn.clone());
        table.hostname_resolvers.push(vpn.clone());
        table.listers.push(vpn.clone());
        table.vpn = Some(vpn);

        table
    }

    /// Install a router-vendor-specific hostname hook, last in
    /// priority.
    pub fn with_custom_source(mut self, source: Arc<dyn HostnameLookup>) -> Self {
        self.hostname_resolvers.push(source);
        self
    }

    /// Register an extra lease file (router integrations).
    pub fn add_lease_file(&self, path: &std::path::Path, format: LeaseFileFormat) {
        if let Some(dhcp) = &self.dhcp {
            if let Err(e) = dhcp.add_lease_file(path, format) {
                warn!(error = %e, ?path, "could not add lease file");
            }
        }
    }

    pub async fn lookup_ip(&self, mac: &str) -> Option<String> {
        for source in &self.ip_resolvers {
            if let Some(ip) = source.lookup_ip(mac).await {
                return Some(ip);
            }
        }
        None
    }

    pub async fn lookup_mac(&self, ip: &str) -> Option<String> {
        for source in &self.mac_resolvers {
            if let Some(mac) = source.lookup_mac(ip).await {
                return Some(mac);
            }
        }
        None
    }

    /// First non-empty hostname for either key, walking sources in
    /// priority order (by IP before by MAC within each source).
    pub async fn lookup_hostname(&self, ip: &str, mac: &str) -> Option<String> {
        for source in &self.hostname_resolvers {
            if let Some(name) = source.hostname_by_ip(ip).await {
                return Some(name);
            }
            if let Some(name) = source.hostname_by_mac(mac).await {
                return Some(name);
            }
        }
        None
    }

    /// Refresh every refreshable source, then union all known IPs into
    /// clients tagged with the sources that contributed. Hostname
    /// lookups here are cache-only for live-lookup sources.
    pub async fn list_clients(&self) -> Vec<Client> {
        self.refresh_all().await;

        let mut by_ip: BTreeMap<String, Client> = BTreeMap::new();
        for lister in &self.listers {
            for ip_str in lister.list_ips() {
                let Ok(ip) = ip_str.parse::<IpAddr>() else {
                    continue;
                };
                match by_ip.entry(ip_str) {
                    Entry::Vacant(slot) => {
                        let mut sources = BTreeSet::new();
                        sources.insert(lister.source_name().to_string());
                        slot.insert(Client {
                            ip,
                            mac: None,
                            hostname: None,
                            sources,
                        });
                    }
                    Entry::Occupied(mut slot) => {
                        slot.get_mut()
                            .sources
                            .insert(lister.source_name().to_string());
                    }
                }
            }
        }

        for (ip, client) in by_ip.iter_mut() {
            for source in &self.mac_resolvers {
                if let Some(mac) = source.lookup_mac(ip).await {
                    if client.mac.is_none() {
                        client.mac = Some(mac);
                    }
                    client.sources.insert(source.source_name().to_string());
                }
            }
            let mac = client.mac.clone().unwrap_or_default();
            for source in &self.hostname_resolvers {
                let found = match source.hostname_by_ip_cached(ip).await {
                    Some(name) => Some(name),
                    None => source.hostname_by_mac(&mac).await,
                };
                if let Some(name) = found {
                    if client.hostname.is_none() {
                        client.hostname = Some(name);
                    }
                    client.sources.insert(source.source_name().to_string());
                }
            }
        }

        by_ip.into_values().collect()
    }

    /// Store client info for a VPN client.
    pub fn store_vpn_client(&self, info: &ClientInfo) {
        if let Some(vpn) = &self.vpn {
            vpn.store(info);
        }
    }

    pub async fn refresh_all(&self) {
        for refresher in &self.refreshers {
            if let Err(e) = refresher.refresh().await {
                debug!(source = refresher.source_name(), error = %e, "refresh failed");
            }
        }
    }

    pub fn refresher_names(&self) -> Vec<&'static str> {
        self.refreshers.iter().map(|r| r.source_name()).collect()
    }

    /// Stop background listeners (releases the mDNS socket).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("ip_resolvers", &self.ip_resolvers.len())
            .field("mac_resolvers", &self.mac_resolvers.len())
            .field("hostname_resolvers", &self.hostname_resolvers.len())
            .field("refreshers", &self.refreshers.len())
            .finish()
    }
}
