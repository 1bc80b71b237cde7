//! DNS wire-format helpers shared by the resolvers and the dispatcher.

use std::net::SocketAddr;

use hearth_dns_domain::{canonical_name, ClientInfo, ProxyError};
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use std::str::FromStr;

/// EDNS0 local option carrying the client MAC (first code of the
/// RFC 6891 local range, as used by dnsmasq).
pub const EDNS0_OPTION_MAC: u16 = 0xFDE9;

/// Canonicalized question tuple; equality is byte-identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionFingerprint {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl QuestionFingerprint {
    pub fn of(query: &Message) -> Result<Self, ProxyError> {
        let question = single_question(query)?;
        Ok(Self {
            name: canonical_name(&question.name().to_utf8()),
            qtype: question.query_type().into(),
            qclass: question.query_class().into(),
        })
    }
}

/// The sole question of a well-formed query.
pub fn single_question(msg: &Message) -> Result<&Query, ProxyError> {
    match msg.queries() {
        [question] => Ok(question),
        queries => Err(ProxyError::BadRequest(format!(
            "expected exactly one question, got {}",
            queries.len()
        ))),
    }
}

/// Serialize a message to wire format.
pub fn serialize(msg: &Message) -> Result<Vec<u8>, ProxyError> {
    let mut buf = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut buf);
    msg.emit(&mut encoder)
        .map_err(|e| ProxyError::BadRequest(format!("failed to serialize message: {e}")))?;
    Ok(buf)
}

/// Parse a wire-format answer.
pub fn parse_answer(bytes: &[u8]) -> Result<Message, ProxyError> {
    Message::from_vec(bytes).map_err(|e| ProxyError::UpstreamProtocolError {
        status: 0,
        body: format!("failed to decode answer: {e}"),
    })
}

/// Build a recursive query for `name`/`record_type` with a random id.
pub fn new_query(name: &str, record_type: RecordType) -> Result<Message, ProxyError> {
    let name = Name::from_str(name)
        .map_err(|e| ProxyError::BadRequest(format!("invalid name {name:?}: {e}")))?;
    let mut query = Query::query(name, record_type);
    query.set_query_class(DNSClass::IN);
    let mut msg = Message::new(fastrand::u16(..), MessageType::Query, OpCode::Query);
    msg.set_recursion_desired(true);
    msg.add_query(query);
    Ok(msg)
}

/// SERVFAIL response preserving the query id and echoing its question.
pub fn servfail_for(query: &Message) -> Message {
    let mut msg = Message::new(query.id(), MessageType::Response, OpCode::Query);
    msg.set_response_code(ResponseCode::ServFail);
    msg.set_recursion_desired(query.recursion_desired());
    msg.set_recursion_available(true);
    for question in query.queries() {
        msg.add_query(question.clone());
    }
    msg
}

/// Smallest TTL across the answer sections, if any record carries one.
pub fn min_ttl(msg: &Message) -> Option<u32> {
    msg.answers()
        .iter()
        .chain(msg.name_servers())
        .filter(|r| r.record_type() != RecordType::OPT)
        .map(|r| r.ttl())
        .min()
}

/// Rewrite every record TTL to the remaining cached lifetime.
pub fn set_ttls(msg: &mut Message, ttl: u32) {
    let rewrite = |records: Vec<hickory_proto::rr::Record>| {
        records
            .into_iter()
            .map(|mut r| {
                if r.record_type() != RecordType::OPT {
                    r.set_ttl(ttl);
                }
                r
            })
            .collect::<Vec<_>>()
    };
    let answers = rewrite(msg.take_answers());
    msg.insert_answers(answers);
    let authorities = rewrite(msg.take_name_servers());
    msg.insert_name_servers(authorities);
    let additionals = rewrite(msg.take_additionals());
    msg.insert_additionals(additionals);
}

/// Client IP and MAC from EDNS options: IP from the client-subnet
/// option, MAC from the local option `EDNS0_OPTION_MAC` (6 raw bytes).
pub fn ip_and_mac_from_msg(msg: &Message) -> (Option<String>, Option<String>) {
    let Some(edns) = msg.extensions().as_ref() else {
        return (None, None);
    };
    let ip = match edns.option(EdnsCode::Subnet) {
        Some(EdnsOption::Subnet(subnet)) => Some(subnet.addr().to_string()),
        _ => None,
    };
    let mac = match edns.option(EdnsCode::Unknown(EDNS0_OPTION_MAC)) {
        Some(EdnsOption::Unknown(_, bytes)) if bytes.len() == 6 => Some(format_mac(bytes)),
        _ => None,
    };
    (ip, mac)
}

/// Lowercase colon-separated MAC from raw bytes.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// The effective client address: the discovered LAN IP when known,
/// otherwise the socket source.
pub fn spoofed_source(addr: SocketAddr, client_info: Option<&ClientInfo>) -> SocketAddr {
    if let Some(info) = client_info {
        if let Ok(ip) = info.ip.parse() {
            return SocketAddr::new(ip, addr.port());
        }
    }
    addr
}
