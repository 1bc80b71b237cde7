//! DHCP lease-file reader: dnsmasq and ISC dhcpd dialects, a registry of
//! well-known router lease paths, change watching, and seeding of the
//! host's own interfaces so queries from this machine resolve too.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_dns_application::{
    HostnameByIp, HostnameByMac, HostnameLookup, IpLister, IpLookup, MacLookup, Refresher,
};
use hearth_dns_domain::{LeaseFileFormat, ProxyError};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{is_valid_mac, normalize_hostname, normalize_ip};

pub const SOURCE_NAME: &str = "dhcp";

/// Well-known lease files per router platform.
pub const LEASE_FILE_REGISTRY: &[(&str, LeaseFileFormat)] = &[
    ("/tmp/dnsmasq.leases", LeaseFileFormat::Dnsmasq),      // dd-wrt
    ("/tmp/dhcp.leases", LeaseFileFormat::Dnsmasq),         // OpenWrt
    ("/var/lib/misc/dnsmasq.leases", LeaseFileFormat::Dnsmasq), // Merlin
    ("/mnt/data/udapi-config/dnsmasq.lease", LeaseFileFormat::Dnsmasq), // UDM Pro
    ("/data/udapi-config/dnsmasq.lease", LeaseFileFormat::Dnsmasq), // UDR
    ("/etc/dhcpd/dhcpd-leases.log", LeaseFileFormat::Dnsmasq), // Synology
    ("/tmp/var/lib/misc/dnsmasq.leases", LeaseFileFormat::Dnsmasq), // Tomato
    ("/run/dnsmasq-dhcp.leases", LeaseFileFormat::Dnsmasq), // EdgeOS
    ("/run/dhcpd.leases", LeaseFileFormat::IscDhcpd),       // EdgeOS
    ("/var/dhcpd/var/db/dhcpd.leases", LeaseFileFormat::IscDhcpd), // pfSense
    ("/home/pi/.router/run/dhcp/dnsmasq.leases", LeaseFileFormat::Dnsmasq), // Firewalla
];

pub struct DhcpSource {
    self_ip: Option<String>,
    mac_to_name: DashMap<String, String>,
    ip_to_name: DashMap<String, String>,
    ip_by_mac: DashMap<String, String>,
    mac_by_ip: DashMap<String, String>,
    files: DashMap<PathBuf, LeaseFileFormat>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl DhcpSource {
    pub fn new(self_ip: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            self_ip,
            mac_to_name: DashMap::new(),
            ip_to_name: DashMap::new(),
            ip_by_mac: DashMap::new(),
            mac_by_ip: DashMap::new(),
            files: DashMap::new(),
            watcher: Mutex::new(None),
        })
    }

    /// Seed self info, read every well-known lease file that exists and
    /// start watching for changes.
    pub fn init(self: &Arc<Self>) -> Result<(), ProxyError> {
        self.add_self();
        for (path, format) in LEASE_FILE_REGISTRY {
            // Absent default files are the normal case.
            let _ = self.add_lease_file(Path::new(path), *format);
        }
        self.watch_changes();
        Ok(())
    }

    /// Register one lease file for reading and watching.
    pub fn add_lease_file(&self, path: &Path, format: LeaseFileFormat) -> Result<(), ProxyError> {
        self.read_lease_file(path, format)?;
        self.files.insert(path.to_path_buf(), format);
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(watcher) = slot.as_mut() {
                let _ = watcher.watch(path, RecursiveMode::NonRecursive);
            }
        }
        Ok(())
    }

    fn read_lease_file(&self, path: &Path, format: LeaseFileFormat) -> Result<(), ProxyError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::UpstreamUnreachable(format!("failed to read lease file {path:?}: {e}"))
        })?;
        match format {
            LeaseFileFormat::Dnsmasq => self.parse_dnsmasq(&content),
            LeaseFileFormat::IscDhcpd => self.parse_isc_dhcpd(&content),
        }
        Ok(())
    }

    /// dnsmasq: `<expiry> <mac> <ip> <hostname> <clientid>` per line.
    fn parse_dnsmasq(&self, content: &str) {
        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            let mac = fields[1].to_lowercase();
            if !is_valid_mac(&mac) {
                // Not a lease line (duid etc).
                continue;
            }
            let mut ip = normalize_ip(fields[2]).to_string();
            if ip.parse::<IpAddr>().is_err() {
                warn!(ip = %ip, "invalid ip address entry in lease file");
                ip = String::new();
            }
            self.mac_by_ip.insert(ip.clone(), mac.clone());
            self.ip_by_mac.insert(mac.clone(), ip.clone());
            let hostname = fields[3];
            if hostname == "*" {
                continue;
            }
            let name = normalize_hostname(hostname).to_string();
            self.mac_to_name.insert(mac, name.clone());
            self.ip_to_name.insert(ip, name);
        }
        debug!(entries = self.mac_by_ip.len(), "dnsmasq leases parsed");
    }

    /// ISC dhcpd: `lease <ip> { hardware ethernet <mac>;
    /// client-hostname "<name>"; }` blocks, committed on `}`.
    fn parse_isc_dhcpd(&self, content: &str) {
        let mut ip = String::new();
        let mut mac = String::new();
        let mut hostname = String::new();
        for line in content.lines() {
            if line.trim_start().starts_with('}') {
                if !mac.is_empty() {
                    self.mac_by_ip.insert(ip.clone(), mac.clone());
                    self.ip_by_mac.insert(mac.clone(), ip.clone());
                    if !hostname.is_empty() && hostname != "*" {
                        let name = normalize_hostname(&hostname).to_string();
                        self.mac_to_name.insert(mac.clone(), name.clone());
                        self.ip_to_name.insert(ip.clone(), name);
                    }
                }
                ip.clear();
                mac.clear();
                hostname.clear();
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                continue;
            }
            match fields[0] {
                "lease" => {
                    ip = normalize_ip(&fields[1].to_lowercase()).to_string();
                    if ip.parse::<IpAddr>().is_err() {
                        warn!(ip = %ip, "invalid ip address entry in lease file");
                        ip = String::new();
                    }
                }
                "hardware" => {
                    if fields.len() >= 3 {
                        mac = fields[2].trim_end_matches(';').to_lowercase();
                        if !is_valid_mac(&mac) {
                            mac = String::new();
                        }
                    }
                }
                "client-hostname" => {
                    hostname = fields[1].trim_matches(|c| c == '"' || c == ';').to_string();
                }
                _ => {}
            }
        }
        debug!(entries = self.mac_by_ip.len(), "isc-dhcpd leases parsed");
    }

    /// Watch registered files plus their parent directories, so atomic
    /// renames of a lease file are still observed.
    fn watch_changes(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => this.handle_event(event),
                Err(e) => warn!(error = %e, "lease watcher error"),
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "could not create lease watcher");
                return;
            }
        };

        let mut dirs_watched: Vec<PathBuf> = Vec::new();
        for entry in self.files.iter() {
            let path = entry.key();
            let _ = watcher.watch(path, RecursiveMode::NonRecursive);
            if let Some(dir) = path.parent() {
                if dir.is_dir() && !dirs_watched.iter().any(|d| d == dir) {
                    let _ = watcher.watch(dir, RecursiveMode::NonRecursive);
                    dirs_watched.push(dir.to_path_buf());
                }
            }
        }

        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
        }
    }

    fn handle_event(&self, event: notify::Event) {
        for path in &event.paths {
            let Some(format) = self.files.get(path).map(|f| *f) else {
                // Creation in a watched directory may be a lease file we
                // know by path from the registry.
                if matches!(event.kind, EventKind::Create(_)) {
                    if let Some((_, format)) = LEASE_FILE_REGISTRY
                        .iter()
                        .find(|(known, _)| Path::new(known) == path)
                    {
                        let _ = self.add_lease_file(path, *format);
                    }
                }
                continue;
            };
            if let Err(e) = self.read_lease_file(path, format) {
                // A vanished file keeps the previous table.
                if path.exists() {
                    warn!(error = %e, ?path, "lease file changed but re-read failed");
                }
            }
        }
    }

    /// Record this host's loopback and interface addresses so queries
    /// from the machine itself carry proper identity.
    fn add_self(&self) {
        let hostname = match hostname::get() {
            Ok(name) => normalize_hostname(&name.to_string_lossy()).to_string(),
            Err(e) => {
                warn!(error = %e, "could not get hostname");
                return;
            }
        };
        self.ip_to_name.insert("127.0.0.1".into(), hostname.clone());
        self.ip_to_name.insert("::1".into(), hostname.clone());

        let Ok(interfaces) = local_ip_address::list_afinet_netifas() else {
            return;
        };
        let mut found = false;
        for (ifname, ip) in interfaces {
            if found {
                break;
            }
            if ip.is_loopback() {
                continue;
            }
            let Some(mac) = interface_mac(&ifname) else {
                continue;
            };
            self.mac_by_ip.insert(ip.to_string(), mac.clone());
            self.ip_by_mac.entry(mac.clone()).or_insert_with(|| ip.to_string());
            if ip.is_ipv4() {
                self.mac_by_ip.entry("127.0.0.1".into()).or_insert_with(|| mac.clone());
            } else {
                self.mac_by_ip.entry("::1".into()).or_insert_with(|| mac.clone());
            }
            self.mac_to_name.insert(mac, hostname.clone());
            self.ip_to_name.insert(ip.to_string(), hostname.clone());
            if let Some(self_ip) = &self.self_ip {
                if ip.to_string() == *self_ip {
                    found = true;
                }
            }
        }
    }
}

/// MAC of a local interface (`/sys/class/net/<iface>/address`).
fn interface_mac(ifname: &str) -> Option<String> {
    let mac = std::fs::read_to_string(format!("/sys/class/net/{ifname}/address")).ok()?;
    let mac = mac.trim().to_lowercase();
    (is_valid_mac(&mac) && mac != "00:00:00:00:00:00").then_some(mac)
}

#[async_trait]
impl IpLookup for DhcpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup_ip(&self, mac: &str) -> Option<String> {
        self.ip_by_mac.get(mac).map(|v| v.clone()).filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl MacLookup for DhcpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn lookup_mac(&self, ip: &str) -> Option<String> {
        self.mac_by_ip.get(ip).map(|v| v.clone()).filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl HostnameByIp for DhcpSource {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String> {
        self.ip_to_name.get(ip).map(|v| v.clone())
    }
}

#[async_trait]
impl HostnameByMac for DhcpSource {
    async fn hostname_by_mac(&self, mac: &str) -> Option<String> {
        self.mac_to_name.get(mac).map(|v| v.clone())
    }
}

#[async_trait]
impl HostnameLookup for DhcpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }
}

impl IpLister for DhcpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn list_ips(&self) -> Vec<String> {
        self.mac_by_ip
            .iter()
            .map(|e| e.key().clone())
            .filter(|ip| !ip.is_empty())
            .collect()
    }
}

#[async_trait]
impl Refresher for DhcpSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn refresh(&self) -> Result<(), ProxyError> {
        for entry in self.files.iter() {
            if let Err(e) = self.read_lease_file(entry.key(), *entry.value()) {
                if entry.key().exists() {
                    warn!(error = %e, path = ?entry.key(), "lease refresh failed");
                }
            }
        }
        Ok(())
    }
}
