use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// Minimal UDP DNS server answering every query with a fixed rcode and,
/// on NoError, a single A record.
pub struct MockDnsServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockDnsServer {
    pub async fn start(rcode: ResponseCode) -> MockDnsServer {
        Self::start_with(rcode, Some((Ipv4Addr::new(1, 2, 3, 4), 60))).await
    }

    pub async fn start_with(
        rcode: ResponseCode,
        answer: Option<(Ipv4Addr, u32)>,
    ) -> MockDnsServer {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = socket.local_addr().expect("local addr");
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => {
                        let Ok((len, peer)) = result else { break };
                        let Ok(query) = Message::from_vec(&buf[..len]) else { continue };
                        let response = Self::build_response(&query, rcode, answer);
                        let _ = socket.send_to(&response, peer).await;
                    }
                }
            }
        });

        MockDnsServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    fn build_response(
        query: &Message,
        rcode: ResponseCode,
        answer: Option<(Ipv4Addr, u32)>,
    ) -> Vec<u8> {
        let mut response = Message::new(query.id(), MessageType::Response, OpCode::Query);
        response.set_response_code(rcode);
        response.set_recursion_available(true);
        for q in query.queries() {
            response.add_query(q.clone());
        }
        if rcode == ResponseCode::NoError {
            if let Some((ip, ttl)) = answer {
                let name = query
                    .queries()
                    .first()
                    .map(|q| q.name().clone())
                    .unwrap_or_else(|| Name::from_str(".").expect("root name"));
                response.insert_answers(vec![Record::from_rdata(name, ttl, RData::A(A(ip)))]);
            }
        }

        let mut bytes = Vec::with_capacity(512);
        let mut encoder = BinEncoder::new(&mut bytes);
        response.emit(&mut encoder).expect("serialize response");
        bytes
    }
}
