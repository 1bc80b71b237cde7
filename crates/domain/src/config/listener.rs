use serde::Deserialize;

/// A listening socket plus the policy attached to it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenerConfig {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub policy: Option<ListenerPolicy>,
}

/// Ordered rule set evaluated by the policy engine. Map rules are keyed
/// by network name, split rules by a domain glob; evaluation order is the
/// declared order within each list, with split rules taking precedence
/// over a map match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenerPolicy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub networks: Vec<PolicyRule>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// A single policy predicate → ordered upstream list pairing.
///
/// For a map rule `key` names a network ("network.0"); for a split rule
/// it is a domain glob ("*.ru"). An unenforced rule logs its would-be
/// decision without altering dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    pub key: String,
    #[serde(default)]
    pub upstreams: Vec<String>,
    #[serde(default = "enforced_default")]
    pub enforced: bool,
}

fn enforced_default() -> bool {
    true
}

impl PolicyRule {
    pub fn new(key: &str, upstreams: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            upstreams: upstreams.iter().map(|u| u.to_string()).collect(),
            enforced: true,
        }
    }

    pub fn unenforced(mut self) -> Self {
        self.enforced = false;
        self
    }
}
