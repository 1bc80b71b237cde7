pub mod listener;
pub mod network;
pub mod service;
pub mod upstream;

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::ProxyError;
use listener::ListenerConfig;
use network::NetworkConfig;
use service::ServiceConfig;
use upstream::UpstreamConfig;

/// Key prefix used when a policy or listener refers to an upstream by its
/// config-map key ("0" becomes "upstream.0").
pub const UPSTREAM_PREFIX: &str = "upstream.";

/// Root configuration, consumed pre-validated by the caller.
///
/// File loading and CLI overrides live outside the core; `init` finishes
/// the in-memory structure (endpoint normalization, CIDR compilation) and
/// is idempotent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub network: HashMap<String, NetworkConfig>,
    #[serde(default)]
    pub upstream: HashMap<String, UpstreamConfig>,
    #[serde(default)]
    pub listener: HashMap<String, ListenerConfig>,
}

impl Config {
    pub fn init(&mut self) -> Result<(), ProxyError> {
        for uc in self.upstream.values_mut() {
            uc.init()?;
        }
        for nc in self.network.values_mut() {
            nc.compile()?;
        }
        Ok(())
    }

    /// Upstream for a listener-level id such as "upstream.0".
    pub fn upstream_by_id(&self, id: &str) -> Option<&UpstreamConfig> {
        self.upstream.get(id.strip_prefix(UPSTREAM_PREFIX).unwrap_or(id))
    }
}
