//! Forwarding-loop detection.
//!
//! Probes are TXT queries for `<uid>.test.`; a listener hook feeds every
//! inbound query through [`LoopGuard::observe`], and an inbound probe
//! whose label is a registered upstream UID proves that upstream routes
//! back to this process. The flag never clears on its own; remediation
//! is an operator action.

use std::collections::HashMap;
use std::sync::Mutex;

use hearth_dns_domain::{canonical_name, ProxyError};
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use tracing::warn;

use super::message::new_query;

/// Domain suffix carried by loop probes.
pub const LOOP_TEST_DOMAIN: &str = ".test";

#[derive(Default)]
pub struct LoopGuard {
    table: Mutex<HashMap<String, bool>>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an upstream UID. Registration never lowers an existing
    /// loop flag.
    pub fn register(&self, uid: &str) {
        if let Ok(mut table) = self.table.lock() {
            table.entry(uid.to_string()).or_insert(false);
        }
    }

    /// The probe query for one upstream.
    pub fn probe_message(uid: &str) -> Result<Message, ProxyError> {
        new_query(&format!("{uid}{LOOP_TEST_DOMAIN}."), RecordType::TXT)
    }

    /// Inspect an inbound query; when it is a probe for a registered
    /// UID, mark that upstream as looping and return its UID.
    pub fn observe(&self, msg: &Message) -> Option<String> {
        let [question] = msg.queries() else {
            return None;
        };
        if question.query_type() != RecordType::TXT {
            return None;
        }
        let name = canonical_name(&question.name().to_utf8());
        let uid = name.strip_suffix(LOOP_TEST_DOMAIN)?;

        let mut table = self.table.lock().ok()?;
        match table.get_mut(uid) {
            Some(flag) => {
                if !*flag {
                    warn!(uid, "DNS forwarding loop detected");
                }
                *flag = true;
                Some(uid.to_string())
            }
            // Unknown labels are somebody else's probes.
            None => None,
        }
    }

    pub fn is_looped(&self, uid: &str) -> bool {
        self.table
            .lock()
            .map(|table| table.get(uid).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Current view of the table, for diagnostics.
    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.table.lock().map(|t| t.clone()).unwrap_or_default()
    }
}
