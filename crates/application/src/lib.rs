//! Hearth DNS application layer: capability ports implemented by the
//! infrastructure crate, and the policy router service.
pub mod ports;
pub mod services;

pub use ports::discovery::{
    HostnameByIp, HostnameByMac, HostnameLookup, IpLister, IpLookup, MacLookup, Refresher,
};
pub use ports::resolver::{QueryContext, Resolver};
pub use services::router::{PolicyRouter, RouteDecision};
