mod helpers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_dns_application::QueryContext;
use hearth_dns_domain::config::Config;
use hearth_dns_domain::{
    ListenerConfig, ListenerPolicy, NetworkConfig, PolicyRule, ResolverType, UpstreamConfig,
};
use hearth_dns_infrastructure::dns::cache::{CacheKey, CacheValue};
use hearth_dns_infrastructure::dns::dispatcher::ProxyDispatcher;
use hearth_dns_infrastructure::dns::loop_guard::LoopGuard;
use hearth_dns_infrastructure::dns::message::{new_query, QuestionFingerprint};
use helpers::mock_dns::MockDnsServer;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::RecordType;

/// Listener 0 routes network.0 to [upstream.1, upstream.0]; both
/// upstreams are legacy endpoints supplied by the caller.
fn test_config(endpoint0: &str, endpoint1: &str) -> Arc<Config> {
    let mut config = Config::default();
    config
        .network
        .insert("0".into(), NetworkConfig::new("network.0", &["192.168.0.0/24"]));

    let mut upstream0 = UpstreamConfig::new("upstream 0", ResolverType::Legacy, endpoint0);
    upstream0.timeout = 500;
    let mut upstream1 = UpstreamConfig::new("upstream 1", ResolverType::Legacy, endpoint1);
    upstream1.timeout = 500;
    config.upstream.insert("0".into(), upstream0);
    config.upstream.insert("1".into(), upstream1);

    config.listener.insert(
        "0".into(),
        ListenerConfig {
            ip: "127.0.0.1".into(),
            port: 5553,
            policy: Some(ListenerPolicy {
                name: "test policy".into(),
                networks: vec![PolicyRule::new("network.0", &["upstream.1", "upstream.0"])],
                rules: vec![],
            }),
        },
    );

    config.init().unwrap();
    Arc::new(config)
}

fn source() -> SocketAddr {
    "192.168.0.1:53124".parse().unwrap()
}

fn answer_with_rcode(query: &Message, rcode: ResponseCode) -> Message {
    let mut answer = Message::new(query.id(), MessageType::Response, OpCode::Query);
    answer.set_response_code(rcode);
    for q in query.queries() {
        answer.add_query(q.clone());
    }
    answer
}

#[tokio::test]
async fn cache_hits_are_isolated_per_upstream() {
    let config = test_config("127.0.0.1:1", "127.0.0.1:1");
    let dispatcher = ProxyDispatcher::new(config);

    let query = new_query("example.com.", RecordType::A).unwrap();
    let fingerprint = QuestionFingerprint::of(&query).unwrap();

    let good = answer_with_rcode(&query, ResponseCode::NoError);
    let refused = answer_with_rcode(&query, ResponseCode::Refused);
    dispatcher.cache().add(
        CacheKey::new(fingerprint.clone(), "upstream.1"),
        CacheValue::new(good, Instant::now() + Duration::from_secs(60)),
    );
    dispatcher.cache().add(
        CacheKey::new(fingerprint.clone(), "upstream.0"),
        CacheValue::new(refused, Instant::now() + Duration::from_secs(60)),
    );

    let ctx = QueryContext::new();
    let got1 = dispatcher
        .proxy(&["upstream.1".into()], &query, &fingerprint, &ctx)
        .await
        .unwrap();
    let got0 = dispatcher
        .proxy(&["upstream.0".into()], &query, &fingerprint, &ctx)
        .await
        .unwrap();

    assert_eq!(got1.response_code(), ResponseCode::NoError);
    assert_eq!(got0.response_code(), ResponseCode::Refused);
    assert_eq!(got1.id(), query.id());
    assert_eq!(got0.id(), query.id());
}

#[tokio::test]
async fn resolves_through_policy_and_mock_upstream() {
    let server = MockDnsServer::start(ResponseCode::NoError).await;
    let config = test_config("127.0.0.1:1", &server.endpoint());
    let dispatcher = ProxyDispatcher::new(config);

    let query = new_query("abc.xyz.", RecordType::A).unwrap();
    let answer = dispatcher
        .handle_query("0", source(), &query)
        .await
        .unwrap();

    assert_eq!(answer.response_code(), ResponseCode::NoError);
    assert_eq!(answer.id(), query.id());
    assert_eq!(answer.answers().len(), 1);
    server.shutdown();
}

#[tokio::test]
async fn failed_upstream_falls_through_to_next() {
    // upstream.1 (first in policy order) is dead; upstream.0 answers.
    let server = MockDnsServer::start(ResponseCode::NoError).await;
    let config = test_config(&server.endpoint(), "127.0.0.1:1");
    let dispatcher = ProxyDispatcher::new(config);

    let query = new_query("abc.xyz.", RecordType::A).unwrap();
    let answer = dispatcher
        .handle_query("0", source(), &query)
        .await
        .unwrap();

    assert_eq!(answer.response_code(), ResponseCode::NoError);
    server.shutdown();
}

#[tokio::test]
async fn exhausted_upstreams_yield_servfail_with_original_id() {
    let config = test_config("127.0.0.1:1", "127.0.0.1:1");
    let dispatcher = ProxyDispatcher::new(config);

    let query = new_query("abc.xyz.", RecordType::A).unwrap();
    let answer = dispatcher
        .handle_query("0", source(), &query)
        .await
        .unwrap();

    assert_eq!(answer.response_code(), ResponseCode::ServFail);
    assert_eq!(answer.id(), query.id());
}

#[tokio::test]
async fn malformed_query_is_rejected() {
    let config = test_config("127.0.0.1:1", "127.0.0.1:1");
    let dispatcher = ProxyDispatcher::new(config);

    let empty = Message::new(7, MessageType::Query, OpCode::Query);
    let err = dispatcher
        .handle_query("0", source(), &empty)
        .await
        .unwrap_err();
    assert!(matches!(err, hearth_dns_domain::ProxyError::BadRequest(_)));
}

#[tokio::test]
async fn looped_upstream_is_filtered_from_dispatch() {
    let server = MockDnsServer::start(ResponseCode::NoError).await;
    // upstream.1 would be preferred but is flagged as a loop.
    let config = test_config(&server.endpoint(), "127.0.0.1:1");
    let looped_uid = config.upstream.get("1").unwrap().uid().to_string();
    let dispatcher = ProxyDispatcher::new(config);

    let probe = LoopGuard::probe_message(&looped_uid).unwrap();
    dispatcher.loop_guard().observe(&probe);
    assert!(dispatcher.loop_guard().is_looped(&looped_uid));

    let query = new_query("abc.xyz.", RecordType::A).unwrap();
    let answer = dispatcher
        .handle_query("0", source(), &query)
        .await
        .unwrap();

    // upstream.0 (the mock) answered; the looped upstream was skipped
    // without being dialed.
    assert_eq!(answer.response_code(), ResponseCode::NoError);
    server.shutdown();
}

#[tokio::test]
async fn successful_answers_are_cached() {
    let server = MockDnsServer::start(ResponseCode::NoError).await;
    let config = test_config("127.0.0.1:1", &server.endpoint());
    let dispatcher = ProxyDispatcher::new(config);

    let query = new_query("cacheme.example.", RecordType::A).unwrap();
    let first = dispatcher
        .handle_query("0", source(), &query)
        .await
        .unwrap();
    assert_eq!(first.response_code(), ResponseCode::NoError);

    // With the upstream gone, the answer must come from cache.
    server.shutdown();
    let second = dispatcher
        .handle_query("0", source(), &query)
        .await
        .unwrap();
    assert_eq!(second.response_code(), ResponseCode::NoError);
    assert_eq!(second.answers().len(), 1);
    // TTL is adjusted to the remaining lifetime.
    assert!(second.answers()[0].ttl() <= 60);
}

#[tokio::test]
async fn inbound_probe_flags_upstream_via_listener_hook() {
    let config = test_config("127.0.0.1:1", "127.0.0.1:1");
    let uid = config.upstream.get("0").unwrap().uid().to_string();
    let dispatcher = ProxyDispatcher::new(config);

    // The upstream forwarded our probe back to this listener.
    let probe = LoopGuard::probe_message(&uid).unwrap();
    let _ = dispatcher.handle_query("0", source(), &probe).await;

    assert!(dispatcher.loop_guard().is_looped(&uid));
}
