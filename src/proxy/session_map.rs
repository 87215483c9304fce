//! Proxy-assigned ⇄ agent-assigned session ids.
//!
//! The editor only ever sees proxy ids. The first session the agent reports
//! is published under the owning [`AcpSession`](crate::acp::AcpSession)'s
//! `proxy_session_id`; any further sessions on the same connection get a
//! freshly minted id. Ids the map has never seen pass through unchanged in
//! both directions.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Bidirectional session id table.
#[derive(Debug)]
pub struct SessionIdMap {
    primary: String,
    primary_claimed: AtomicBool,
    agent_to_proxy: DashMap<String, String>,
    proxy_to_agent: DashMap<String, String>,
}

impl SessionIdMap {
    /// Create a map whose first recorded session is published as `primary`.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            primary_claimed: AtomicBool::new(false),
            agent_to_proxy: DashMap::new(),
            proxy_to_agent: DashMap::new(),
        }
    }

    /// Proxy id reserved for the first session.
    #[must_use]
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Record an agent-assigned id and return the proxy id it is published as.
    ///
    /// Recording the same agent id twice returns the same proxy id.
    pub fn record(&self, agent_id: &str) -> String {
        if let Some(existing) = self.agent_to_proxy.get(agent_id) {
            return existing.clone();
        }

        let proxy_id = if self.primary_claimed.swap(true, Ordering::AcqRel) {
            Uuid::new_v4().to_string()
        } else {
            self.primary.clone()
        };

        self.agent_to_proxy.insert(agent_id.to_owned(), proxy_id.clone());
        self.proxy_to_agent.insert(proxy_id.clone(), agent_id.to_owned());
        debug!(agent_session_id = agent_id, session_id = %proxy_id, "session map: recorded");
        proxy_id
    }

    /// Agent id for a proxy id, if known.
    #[must_use]
    pub fn agent_id_for(&self, proxy_id: &str) -> Option<String> {
        self.proxy_to_agent.get(proxy_id).map(|entry| entry.value().clone())
    }

    /// Proxy id for an agent id, if known.
    #[must_use]
    pub fn proxy_id_for(&self, agent_id: &str) -> Option<String> {
        self.agent_to_proxy.get(agent_id).map(|entry| entry.value().clone())
    }

    /// Every agent session id recorded so far.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        self.agent_to_proxy.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of recorded sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agent_to_proxy.len()
    }

    /// Whether no session has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agent_to_proxy.is_empty()
    }
}
