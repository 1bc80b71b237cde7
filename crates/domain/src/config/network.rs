use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::errors::ProxyError;

/// Named set of CIDRs used as a policy predicate over source addresses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cidrs: Vec<String>,
    #[serde(skip)]
    networks: Vec<IpNetwork>,
}

impl NetworkConfig {
    pub fn new(name: &str, cidrs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            cidrs: cidrs.iter().map(|c| c.to_string()).collect(),
            networks: Vec::new(),
        }
    }

    /// Parse every CIDR into a prefix structure. Idempotent.
    pub fn compile(&mut self) -> Result<(), ProxyError> {
        self.networks = self
            .cidrs
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNetwork>().map_err(|e| {
                    ProxyError::ConfigInvalid(format!("invalid cidr {cidr:?}: {e}"))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(ip))
    }
}
