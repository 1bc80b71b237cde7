//! Policy engine: maps (source address, listener, domain) to an ordered
//! upstream list.

use std::net::IpAddr;
use std::sync::Arc;

use hearth_dns_domain::config::{Config, UPSTREAM_PREFIX};
use hearth_dns_domain::{canonical_name, wildcard_matches, ListenerConfig, PolicyRule};
use tracing::debug;

const NETWORK_PREFIX: &str = "network.";
const NO_NETWORK: &str = "no network";
const NO_RULE: &str = "no rule";

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// Ordered upstream ids ("upstream.0", ...).
    pub upstreams: Vec<String>,
    /// True when a rule (not the listener default) decided the route.
    pub matched: bool,
    /// Human-readable matched-rule description, also logged.
    pub description: String,
}

pub struct PolicyRouter {
    config: Arc<Config>,
}

impl PolicyRouter {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Evaluate the listener's policy for one query.
    ///
    /// Map rules are walked first; the first one whose network contains
    /// the source becomes the candidate. Split rules are then walked and
    /// an enforced domain match supersedes the candidate (which is then
    /// reported as unenforced). Rules explicitly marked unenforced log
    /// their would-be decision and never alter dispatch.
    pub fn upstream_for(
        &self,
        source: IpAddr,
        default_upstream: &str,
        listener: &ListenerConfig,
        domain: &str,
    ) -> RouteDecision {
        let default = vec![format!("{UPSTREAM_PREFIX}{default_upstream}")];
        let domain = canonical_name(domain);

        let Some(policy) = &listener.policy else {
            return RouteDecision {
                upstreams: default,
                matched: false,
                description: format!("no policy, {NO_NETWORK}, {NO_RULE}"),
            };
        };

        let network_match = self.match_network(&policy.networks, source);
        if !policy.networks.is_empty() && network_match.is_none() {
            let description =
                format!("{}, {NO_NETWORK}, {NO_RULE} -> [{}]", policy.name, default.join(" "));
            debug!(decision = %description, "policy: source outside every network");
            return RouteDecision {
                upstreams: default,
                matched: false,
                description,
            };
        }

        let network_tag = network_match
            .map(|rule| rule.key.as_str())
            .unwrap_or(NO_NETWORK);

        for rule in &policy.rules {
            if rule.key != domain && !wildcard_matches(&rule.key, &domain) {
                continue;
            }
            if !rule.enforced {
                let description = format!(
                    "{}, {network_tag}, {} (unenforced) -> [{}]",
                    policy.name,
                    rule.key,
                    rule.upstreams.join(" ")
                );
                debug!(decision = %description, "policy: unenforced split rule");
                continue;
            }
            // A domain match wins over the network candidate, which is
            // reported as unenforced.
            let network_part = match network_match {
                Some(net) => format!("{} (unenforced)", net.key),
                None => NO_NETWORK.to_string(),
            };
            let description = format!(
                "{}, {network_part}, {} -> [{}]",
                policy.name,
                rule.key,
                rule.upstreams.join(" ")
            );
            debug!(decision = %description, "policy: split rule matched");
            return RouteDecision {
                upstreams: rule.upstreams.clone(),
                matched: true,
                description,
            };
        }

        if let Some(rule) = network_match {
            if rule.enforced {
                let description = format!(
                    "{}, {}, {NO_RULE} -> [{}]",
                    policy.name,
                    rule.key,
                    rule.upstreams.join(" ")
                );
                debug!(decision = %description, "policy: network rule matched");
                return RouteDecision {
                    upstreams: rule.upstreams.clone(),
                    matched: true,
                    description,
                };
            }
            let description = format!(
                "{}, {} (unenforced), {NO_RULE} -> [{}]",
                policy.name,
                rule.key,
                rule.upstreams.join(" ")
            );
            debug!(decision = %description, "policy: unenforced network rule");
            return RouteDecision {
                upstreams: default,
                matched: false,
                description,
            };
        }

        let description =
            format!("{}, {NO_NETWORK}, {NO_RULE} -> [{}]", policy.name, default.join(" "));
        debug!(decision = %description, "policy: listener default");
        RouteDecision {
            upstreams: default,
            matched: false,
            description,
        }
    }

    fn match_network<'a>(&self, rules: &'a [PolicyRule], source: IpAddr) -> Option<&'a PolicyRule> {
        rules.iter().find(|rule| {
            let network_name = rule.key.strip_prefix(NETWORK_PREFIX).unwrap_or(&rule.key);
            self.config
                .network
                .get(network_name)
                .is_some_and(|nc| nc.contains(source))
        })
    }
}
