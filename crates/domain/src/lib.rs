//! Hearth DNS domain layer: configuration model, error taxonomy and the
//! pure name-matching logic shared by every other crate.
pub mod client_info;
pub mod config;
pub mod dns_name;
pub mod errors;

pub use client_info::{ClientInfo, LeaseFileFormat};
pub use config::listener::{ListenerConfig, ListenerPolicy, PolicyRule};
pub use config::network::NetworkConfig;
pub use config::service::ServiceConfig;
pub use config::upstream::{IpStack, ResolverType, UpstreamConfig};
pub use config::Config;
pub use dns_name::{canonical_name, wildcard_matches};
pub use errors::ProxyError;
