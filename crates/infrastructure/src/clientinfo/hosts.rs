//! Static hosts-file mapper with change watching.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_dns_application::{HostnameByIp, HostnameByMac, HostnameLookup, Refresher};
use hearth_dns_domain::ProxyError;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::normalize_hostname;

const HOSTS_PATH: &str = "/etc/hosts";

pub const SOURCE_NAME: &str = "hosts";

pub struct HostsFileSource {
    path: PathBuf,
    ip_to_name: DashMap<String, String>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl HostsFileSource {
    pub fn new() -> Arc<Self> {
        Self::with_path(HOSTS_PATH)
    }

    pub fn with_path(path: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            ip_to_name: DashMap::new(),
            watcher: Mutex::new(None),
        })
    }

    pub async fn init(self: &Arc<Self>) -> Result<(), ProxyError> {
        self.read_file()?;
        self.watch_changes();
        Ok(())
    }

    fn read_file(&self) -> Result<(), ProxyError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ProxyError::UpstreamUnreachable(format!("failed to read {:?}: {e}", self.path))
        })?;
        self.parse(&content);
        Ok(())
    }

    fn parse(&self, content: &str) {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let mut fields = line.split_whitespace();
            let Some(ip) = fields.next() else { continue };
            if ip.parse::<std::net::IpAddr>().is_err() {
                continue;
            }
            let Some(name) = fields.next() else { continue };
            let name = normalize_hostname(name);
            if name.is_empty() || name == "*" {
                continue;
            }
            self.ip_to_name.insert(ip.to_string(), name.to_string());
        }
        debug!(entries = self.ip_to_name.len(), "hosts file parsed");
    }

    /// Re-read on any change event; a vanished file keeps the previous
    /// table.
    fn watch_changes(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(_) => {
                    if let Err(e) = this.read_file() {
                        if this.path.exists() {
                            warn!(error = %e, path = ?this.path, "hosts file changed but re-read failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "hosts watcher error"),
            }
        });
        match watcher {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&self.path, RecursiveMode::NonRecursive) {
                    warn!(error = %e, path = ?self.path, "could not watch hosts file");
                    return;
                }
                if let Ok(mut slot) = self.watcher.lock() {
                    *slot = Some(watcher);
                }
            }
            Err(e) => warn!(error = %e, "could not create hosts watcher"),
        }
    }
}

#[async_trait]
impl HostnameByIp for HostsFileSource {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String> {
        self.ip_to_name.get(ip).map(|v| v.clone())
    }
}

#[async_trait]
impl HostnameByMac for HostsFileSource {
    async fn hostname_by_mac(&self, _mac: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl HostnameLookup for HostsFileSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }
}

#[async_trait]
impl Refresher for HostsFileSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn refresh(&self) -> Result<(), ProxyError> {
        self.read_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_hosts_entries() {
        let source = HostsFileSource::with_path("/dev/null");
        source.parse(
            "127.0.0.1 localhost\n192.168.1.5 nas.local nas # storage\n# comment\nbad-line\n",
        );
        assert_eq!(
            source.hostname_by_ip("192.168.1.5").await.as_deref(),
            Some("nas")
        );
        assert_eq!(
            source.hostname_by_ip("127.0.0.1").await.as_deref(),
            Some("localhost")
        );
        assert_eq!(source.hostname_by_ip("10.0.0.1").await, None);
        assert_eq!(source.hostname_by_mac("aa:bb:cc:dd:ee:ff").await, None);
    }

    #[tokio::test]
    async fn file_changes_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "192.168.1.9 printer\n").unwrap();
        let source = HostsFileSource::with_path(&path);
        source.init().await.unwrap();
        assert_eq!(
            source.hostname_by_ip("192.168.1.9").await.as_deref(),
            Some("printer")
        );

        std::fs::write(&path, "192.168.1.9 scanner\n").unwrap();
        // The watcher thread needs a moment; poll with a deadline.
        for _ in 0..50 {
            if source.hostname_by_ip("192.168.1.9").await.as_deref() == Some("scanner") {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        panic!("watcher never observed the rewrite");
    }
}
