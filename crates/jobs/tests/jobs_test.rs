use std::sync::Arc;

use hearth_dns_domain::config::Config;
use hearth_dns_domain::ServiceConfig;
use hearth_dns_infrastructure::clientinfo::Table;
use hearth_dns_infrastructure::dns::dispatcher::ProxyDispatcher;
use hearth_dns_jobs::{DiscoveryRefreshJob, JobRunner, LoopCheckJob};
use tokio_util::sync::CancellationToken;

fn quiet_service() -> ServiceConfig {
    // Keep tests hermetic: no mDNS socket, no PTR traffic, no ARP reads.
    ServiceConfig {
        discover_dhcp: Some(false),
        discover_arp: Some(false),
        discover_mdns: Some(false),
        discover_ptr: Some(false),
        discover_hosts: Some(false),
        ..ServiceConfig::default()
    }
}

#[tokio::test]
async fn runner_starts_and_stops_cleanly() {
    let table = Arc::new(Table::init(&quiet_service()).await);
    let dispatcher = Arc::new(ProxyDispatcher::new(Arc::new(Config::default())));
    let shutdown = CancellationToken::new();

    JobRunner::new()
        .with_discovery_refresh(
            DiscoveryRefreshJob::new(Arc::clone(&table))
                .with_interval(1)
                .with_cancellation(shutdown.clone()),
        )
        .with_loop_check(
            LoopCheckJob::new(Arc::clone(&dispatcher))
                .with_interval(1)
                .with_cancellation(shutdown.clone()),
        )
        .start()
        .await;

    // Let both jobs take at least one tick, then shut down.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown.cancel();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

#[tokio::test]
async fn loop_check_probes_all_upstreams_without_panicking() {
    use hearth_dns_domain::{ResolverType, UpstreamConfig};

    let mut config = Config::default();
    let mut uc = UpstreamConfig::new("dead", ResolverType::Legacy, "127.0.0.1:1");
    uc.timeout = 200;
    config.upstream.insert("0".into(), uc);
    config.init().unwrap();

    let dispatcher = Arc::new(ProxyDispatcher::new(Arc::new(config)));
    dispatcher.check_dns_loops().await;

    // The probe failed (dead upstream) but nothing is flagged: a loop
    // is only recorded when the probe comes back through a listener.
    let flagged: Vec<_> = dispatcher
        .loop_guard()
        .snapshot()
        .into_iter()
        .filter(|(_, looped)| *looped)
        .collect();
    assert!(flagged.is_empty());
}
