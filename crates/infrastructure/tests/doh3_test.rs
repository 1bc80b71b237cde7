#![cfg(feature = "doh3")]
mod helpers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hearth_dns_application::{QueryContext, Resolver};
use hearth_dns_domain::config::Config;
use hearth_dns_domain::{
    ListenerConfig, ListenerPolicy, NetworkConfig, PolicyRule, ProxyError, ResolverType,
    UpstreamConfig,
};
use hearth_dns_infrastructure::dns::dispatcher::ProxyDispatcher;
use hearth_dns_infrastructure::dns::message::new_query;
use hearth_dns_infrastructure::dns::resolver::doh::DohResolver;
use helpers::mock_dns::MockDnsServer;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;

#[tokio::test]
async fn doh3_without_round_tripper_is_transport_unavailable() {
    let mut uc = UpstreamConfig::new("doh3", ResolverType::Doh3, "https://example.com/dns-query");
    uc.init().unwrap();
    let resolver = DohResolver::without_h3(Arc::new(uc));

    let query = new_query("example.com.", RecordType::A).unwrap();
    let ctx = QueryContext::new().with_timeout(Duration::from_secs(1));
    let err = resolver.resolve(&query, &ctx).await.unwrap_err();
    assert!(
        matches!(err, ProxyError::TransportUnavailable(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn dispatcher_advances_past_failing_doh3_upstream() {
    let server = MockDnsServer::start(ResponseCode::NoError).await;

    let mut config = Config::default();
    config
        .network
        .insert("0".into(), NetworkConfig::new("network.0", &["192.168.0.0/24"]));

    // Preferred upstream is DoH3 against a dead endpoint; fallback is a
    // live legacy mock.
    let mut doh3 = UpstreamConfig::new("doh3", ResolverType::Doh3, "https://127.0.0.1:1/dns-query");
    doh3.timeout = 400;
    let mut legacy = UpstreamConfig::new("legacy", ResolverType::Legacy, &server.endpoint());
    legacy.timeout = 500;
    config.upstream.insert("1".into(), doh3);
    config.upstream.insert("0".into(), legacy);

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

    let dispatcher = ProxyDispatcher::new(Arc::new(config));
    let source: SocketAddr = "192.168.0.1:53124".parse().unwrap();
    let query = new_query("abc.xyz.", RecordType::A).unwrap();

    let answer = dispatcher.handle_query("0", source, &query).await.unwrap();
    assert_eq!(answer.response_code(), ResponseCode::NoError);
    server.shutdown();
}
