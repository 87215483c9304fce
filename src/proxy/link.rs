//! State shared by the two pumps of one running proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::acp::message::{self, MessageKind};
use crate::acp::AcpSession;
use crate::proxy::session_map::SessionIdMap;
use crate::translate::{Direction, PathTranslator, TranslationRules};

/// Requests whose replies carry a new agent session id.
pub const SESSION_ESTABLISHING_METHODS: &[&str] = &["session/new"];

/// Where an inbound message goes after [`ProxyLink::route_inbound`].
#[derive(Debug)]
pub enum InboundRoute {
    /// Write to the editor.
    Forward(Value),
    /// Consumed by a proxy-issued request (or dropped as a late reply).
    Consumed,
}

/// An editor request the agent has not answered yet.
#[derive(Debug)]
struct EditorRequest {
    method: String,
    /// The editor's own id when it was replaced on the agent wire.
    original_id: Option<Value>,
}

/// Session, translation tables, and id bookkeeping for one proxy run.
#[derive(Debug)]
pub struct ProxyLink {
    session: Arc<AcpSession>,
    sessions: SessionIdMap,
    editor_requests: DashMap<String, EditorRequest>,
    aliases: AtomicU64,
    translator: Arc<PathTranslator>,
    rules: Arc<TranslationRules>,
}

impl ProxyLink {
    /// Bind translation tables to a session.
    pub fn new(session: Arc<AcpSession>, translator: Arc<PathTranslator>, rules: Arc<TranslationRules>) -> Self {
        let sessions = SessionIdMap::new(session.proxy_session_id());
        Self {
            session,
            sessions,
            editor_requests: DashMap::new(),
            aliases: AtomicU64::new(0),
            translator,
            rules,
        }
    }

    /// The proxied session.
    #[must_use]
    pub fn session(&self) -> &Arc<AcpSession> {
        &self.session
    }

    /// Session id table.
    #[must_use]
    pub fn sessions(&self) -> &SessionIdMap {
        &self.sessions
    }

    /// Editor requests still waiting for the agent's reply.
    #[must_use]
    pub fn pending_editor_requests(&self) -> usize {
        self.editor_requests.len()
    }

    /// Forget every unanswered editor request.
    pub fn clear_editor_requests(&self) {
        let dropped = self.editor_requests.len();
        self.editor_requests.clear();
        if dropped > 0 {
            debug!(dropped, "proxy link: unanswered editor requests forgotten");
        }
    }

    /// Rewrite host paths and proxy session ids in an editor-bound-for-agent
    /// message.
    pub fn translate_outbound(&self, message: &mut Value) {
        let matched = self.rules.apply(Direction::Outbound, message, &self.translator);
        if let Some(session_id) = message::params_session_id_mut(message) {
            if let Some(agent_id) = self.sessions.agent_id_for(session_id) {
                *session_id = agent_id;
            }
        }
        trace!(method = message::method(message).unwrap_or(""), matched, "proxy outbound: translated");
    }

    /// Translate an editor message and remember editor requests so their
    /// replies can be translated and mapped.
    ///
    /// An editor id that falls in the proxy's own id space is swapped for an
    /// alias on the agent wire and restored on the reply.
    ///
    /// Must run before the message is written: the reply may arrive before
    /// the write returns.
    pub fn prepare_outbound(&self, message: &mut Value) {
        self.translate_outbound(message);

        if message::classify(message) != MessageKind::Request {
            return;
        }
        let Some(method) = message::method(message).map(str::to_owned) else {
            return;
        };
        let Some(mut key) = message::message_id_key(message) else {
            return;
        };

        let mut original_id = None;
        if message::is_proxy_issued(&key) {
            let n = self.aliases.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            let alias = message::editor_alias_id(n);
            original_id = message.get("id").cloned();
            message["id"] = Value::String(alias.clone());
            debug!(id = %key, alias = %alias, "proxy outbound: editor id aliased");
            key = alias;
        }

        trace!(id = %key, method = %method, "proxy outbound: tracking editor request");
        self.editor_requests.insert(key, EditorRequest { method, original_id });
    }

    /// Decide what happens to one message from the agent.
    ///
    /// - Replies to editor requests get the inbound rules of the request's
    ///   method, their editor id restored, and, for session-establishing
    ///   requests, the agent's session id swapped for the proxy id.
    /// - Replies to proxy-issued requests complete their pending slot.
    /// - Requests and notifications get container paths and agent session
    ///   ids rewritten.
    /// - Other replies pass through unchanged.
    pub fn route_inbound(&self, mut message: Value) -> InboundRoute {
        if message::classify(&message) != MessageKind::Response {
            self.rules.apply(Direction::Inbound, &mut message, &self.translator);
            if let Some(session_id) = message::params_session_id_mut(&mut message) {
                if let Some(proxy_id) = self.sessions.proxy_id_for(session_id) {
                    *session_id = proxy_id;
                }
            }
            return InboundRoute::Forward(message);
        }

        let Some(key) = message::message_id_key(&message) else {
            return InboundRoute::Forward(message);
        };

        if let Some((_, request)) = self.editor_requests.remove(&key) {
            self.restore_reply(&request, &mut message);
            return InboundRoute::Forward(message);
        }

        if message::is_proxy_issued(&key) {
            if !self.session.try_complete(&key, message) {
                debug!(id = %key, "proxy inbound: late reply to proxy request dropped");
            }
            return InboundRoute::Consumed;
        }

        InboundRoute::Forward(message)
    }

    fn restore_reply(&self, request: &EditorRequest, reply: &mut Value) {
        if let Some(id) = &request.original_id {
            reply["id"] = id.clone();
        }
        if SESSION_ESTABLISHING_METHODS.contains(&request.method.as_str()) {
            self.record_new_session(reply);
        }
        let matched = self
            .rules
            .apply_for_method(Direction::Inbound, &request.method, reply, &self.translator);
        trace!(method = %request.method, matched, "proxy inbound: reply translated");
    }

    fn record_new_session(&self, response: &mut Value) {
        let Some(session_id) = message::result_session_id_mut(response) else {
            return;
        };

        let agent_id = session_id.clone();
        let proxy_id = self.sessions.record(&agent_id);
        if proxy_id == self.session.proxy_session_id() {
            self.session.set_agent_session_id(&agent_id);
        }
        *session_id = proxy_id;
    }
}
