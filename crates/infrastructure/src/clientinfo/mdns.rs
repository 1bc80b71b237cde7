//! Passive mDNS listener: joins the IPv4 and IPv6 multicast groups and
//! harvests A/AAAA answers other devices announce about themselves.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hearth_dns_application::{HostnameByIp, HostnameByMac, HostnameLookup, IpLister};
use hearth_dns_domain::ProxyError;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::RData;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::normalize_hostname;

pub const SOURCE_NAME: &str = "mdns";

const MDNS_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_MULTICAST_ADDR_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
const MDNS_PORT: u16 = 5353;

pub struct MdnsSource {
    ip_to_name: DashMap<String, String>,
}

impl MdnsSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ip_to_name: DashMap::new(),
        })
    }

    /// Join both multicast groups and run the listeners until
    /// `shutdown` fires. A host without IPv6 keeps the IPv4 listener.
    pub fn init(self: &Arc<Self>, shutdown: CancellationToken) -> Result<(), ProxyError> {
        let socket = multicast_socket_v4().map_err(|e| {
            ProxyError::TransportUnavailable(format!("could not open mDNS socket: {e}"))
        })?;
        self.listen_on(socket, shutdown.clone());

        match multicast_socket_v6() {
            Ok(socket) => self.listen_on(socket, shutdown),
            Err(e) => warn!(error = %e, "could not open IPv6 mDNS socket"),
        }
        Ok(())
    }

    fn listen_on(self: &Arc<Self>, socket: UdpSocket, shutdown: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 9000];
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("mDNS listener released");
                        break;
                    }
                    received = socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, _)) => this.harvest(&buf[..len]),
                            Err(e) => {
                                warn!(error = %e, "mDNS recv failed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    fn harvest(&self, packet: &[u8]) {
        let Ok(msg) = Message::from_vec(packet) else {
            return;
        };
        if msg.message_type() != MessageType::Response {
            return;
        }
        for record in msg.answers().iter().chain(msg.additionals()) {
            let name = normalize_hostname(&record.name().to_utf8()).to_string();
            if name.is_empty() {
                continue;
            }
            match record.data() {
                RData::A(a) => {
                    self.ip_to_name.insert(a.0.to_string(), name);
                }
                RData::AAAA(aaaa) => {
                    self.ip_to_name.insert(aaaa.0.to_string(), name);
                }
                _ => {}
            }
        }
    }
}

/// Reusable multicast socket joined to 224.0.0.251 on the mDNS port.
fn multicast_socket_v4() -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT)).into())?;
    socket.join_multicast_v4(&MDNS_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Reusable multicast socket joined to ff02::fb on the mDNS port.
fn multicast_socket_v6() -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_only_v6(true)?;
    socket.bind(
        &SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0)).into(),
    )?;
    socket.join_multicast_v6(&MDNS_MULTICAST_ADDR_V6, 0)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

#[async_trait]
impl HostnameByIp for MdnsSource {
    async fn hostname_by_ip(&self, ip: &str) -> Option<String> {
        self.ip_to_name.get(ip).map(|v| v.clone())
    }
}

#[async_trait]
impl HostnameByMac for MdnsSource {
    async fn hostname_by_mac(&self, _mac: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl HostnameLookup for MdnsSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }
}

impl IpLister for MdnsSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn list_ips(&self) -> Vec<String> {
        self.ip_to_name.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::message::serialize;
    use hickory_proto::op::OpCode;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, Record};
    use std::str::FromStr;

    #[tokio::test]
    async fn harvests_a_records_from_responses() {
        let source = MdnsSource::new();
        let mut msg = Message::new(0, MessageType::Response, OpCode::Query);
        let name = Name::from_str("printer.local.").unwrap();
        msg.insert_answers(vec![Record::from_rdata(
            name,
            120,
            RData::A(A(Ipv4Addr::new(192, 168, 1, 42))),
        )]);
        source.harvest(&serialize(&msg).unwrap());
        assert_eq!(
            source.hostname_by_ip("192.168.1.42").await.as_deref(),
            Some("printer")
        );
    }

    #[tokio::test]
    async fn harvests_aaaa_records_from_responses() {
        use hickory_proto::rr::rdata::AAAA;

        let source = MdnsSource::new();
        let mut msg = Message::new(0, MessageType::Response, OpCode::Query);
        let name = Name::from_str("nas.local.").unwrap();
        msg.insert_answers(vec![Record::from_rdata(
            name,
            120,
            RData::AAAA(AAAA("fd00::42".parse().unwrap())),
        )]);
        source.harvest(&serialize(&msg).unwrap());
        assert_eq!(
            source.hostname_by_ip("fd00::42").await.as_deref(),
            Some("nas")
        );
    }

    #[tokio::test]
    async fn ignores_queries() {
        let source = MdnsSource::new();
        let msg = crate::dns::message::new_query("printer.local.", hickory_proto::rr::RecordType::A)
            .unwrap();
        source.harvest(&serialize(&msg).unwrap());
        assert!(source.list_ips().is_empty());
    }
}
