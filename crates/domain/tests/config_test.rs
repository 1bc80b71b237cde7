use hearth_dns_domain::config::Config;
use hearth_dns_domain::{IpStack, NetworkConfig, ResolverType, UpstreamConfig};

struct InitCase {
    name: &'static str,
    resolver_type: ResolverType,
    endpoint: &'static str,
    want_endpoint: &'static str,
    want_domain: &'static str,
    want_stack: IpStack,
}

#[test]
fn upstream_init_table() {
    let cases = [
        InitCase {
            name: "doh",
            resolver_type: ResolverType::Doh,
            endpoint: "https://example.com",
            want_endpoint: "https://example.com",
            want_domain: "example.com",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "doh with query param",
            resolver_type: ResolverType::Doh,
            endpoint: "https://example.com?k=v",
            want_endpoint: "https://example.com?k=v",
            want_domain: "example.com",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "dot with port",
            resolver_type: ResolverType::Dot,
            endpoint: "dns.example.org:8853",
            want_endpoint: "dns.example.org:8853",
            want_domain: "dns.example.org",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "dot without port",
            resolver_type: ResolverType::Dot,
            endpoint: "dns.example.org",
            want_endpoint: "dns.example.org:853",
            want_domain: "dns.example.org",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "doq without port",
            resolver_type: ResolverType::Doq,
            endpoint: "dns.example.org",
            want_endpoint: "dns.example.org:853",
            want_domain: "dns.example.org",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "legacy with port",
            resolver_type: ResolverType::Legacy,
            endpoint: "1.2.3.4:53",
            want_endpoint: "1.2.3.4:53",
            want_domain: "1.2.3.4",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "legacy without port",
            resolver_type: ResolverType::Legacy,
            endpoint: "1.2.3.4",
            want_endpoint: "1.2.3.4:53",
            want_domain: "1.2.3.4",
            want_stack: IpStack::Both,
        },
        InitCase {
            name: "cooperative dot",
            resolver_type: ResolverType::Dot,
            endpoint: "freedns.controld.com",
            want_endpoint: "freedns.controld.com:853",
            want_domain: "freedns.controld.com",
            want_stack: IpStack::Split,
        },
    ];

    for case in cases {
        let mut uc = UpstreamConfig::new(case.name, case.resolver_type, case.endpoint);
        uc.init().unwrap_or_else(|e| panic!("{}: init failed: {e}", case.name));
        assert_eq!(uc.endpoint, case.want_endpoint, "{}", case.name);
        assert_eq!(uc.domain, case.want_domain, "{}", case.name);
        assert_eq!(uc.ip_stack, Some(case.want_stack), "{}", case.name);
        assert!(!uc.uid().is_empty(), "{}", case.name);
    }
}

#[test]
fn legacy_literal_bootstrap() {
    let mut uc = UpstreamConfig::new("legacy", ResolverType::Legacy, "1.2.3.4");
    uc.init().unwrap();
    assert_eq!(uc.endpoint, "1.2.3.4:53");
    assert_eq!(uc.domain, "1.2.3.4");
    assert_eq!(
        uc.bootstrap_ips(),
        vec!["1.2.3.4".parse::<std::net::IpAddr>().unwrap()]
    );
}

#[test]
fn config_init_compiles_networks_and_upstreams() {
    let mut config = Config::default();
    config
        .network
        .insert("0".into(), NetworkConfig::new("network.0", &["10.0.0.0/8"]));
    config.upstream.insert(
        "0".into(),
        UpstreamConfig::new("u0", ResolverType::Legacy, "9.9.9.9"),
    );
    config.init().unwrap();

    assert!(config.network.get("0").unwrap().contains("10.1.2.3".parse().unwrap()));
    let uc = config.upstream_by_id("upstream.0").unwrap();
    assert_eq!(uc.endpoint, "9.9.9.9:53");
    assert!(config.upstream_by_id("upstream.7").is_none());
}
