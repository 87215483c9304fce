//! Unit tests for `ProxyLink` routing: editor request tracking, reply
//! translation, and id aliasing.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use cai_acp_proxy::acp::{AcpSession, AgentProcess};
use cai_acp_proxy::proxy::{InboundRoute, ProxyLink};
use cai_acp_proxy::translate::{Direction, FieldKind, PathTranslator, TranslationRule, TranslationRules};

#[derive(Debug)]
struct IdleProcess;

impl AgentProcess for IdleProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = io::Result<Option<i32>>> + Send + '_>> {
        Box::pin(async { Ok(None) })
    }
}

fn link_with(rules: TranslationRules) -> ProxyLink {
    let session = Arc::new(AcpSession::new(
        "/home/alice/proj",
        Box::new(IdleProcess),
        Box::new(tokio::io::sink()),
        CancellationToken::new(),
    ));
    let translator = PathTranslator::with_default_container_root("/home/alice/proj").expect("valid roots");
    ProxyLink::new(session, Arc::new(translator), Arc::new(rules))
}

fn echo_rules() -> TranslationRules {
    let mut rules = TranslationRules::acp_defaults();
    rules.push(TranslationRule::new(Direction::Outbound, "x/echo", "params.path", FieldKind::Path).unwrap());
    rules.push(TranslationRule::new(Direction::Inbound, "x/echo", "result.received.path", FieldKind::Path).unwrap());
    rules
}

fn forwarded(route: InboundRoute) -> Value {
    match route {
        InboundRoute::Forward(message) => message,
        InboundRoute::Consumed => panic!("expected the message to be forwarded"),
    }
}

// ── Replies to editor requests ───────────────────────────────────────────────

/// A reply is translated with the inbound rules of the request it answers.
#[test]
fn reply_uses_rules_of_originating_method() {
    let link = link_with(echo_rules());
    let mut request = json!({"jsonrpc": "2.0", "id": 1, "method": "x/echo", "params": {"path": "/home/alice/proj/a"}});

    link.prepare_outbound(&mut request);
    assert_eq!(request["params"]["path"], "/home/agent/workspace/a");
    assert_eq!(link.pending_editor_requests(), 1);

    let reply = json!({"jsonrpc": "2.0", "id": 1, "result": {"received": {"path": "/home/agent/workspace/a"}}});
    let delivered = forwarded(link.route_inbound(reply));

    assert_eq!(delivered["result"]["received"]["path"], "/home/alice/proj/a");
    assert_eq!(link.pending_editor_requests(), 0);
}

/// With no rule for the method, the reply is forwarded exactly as sent.
#[test]
fn reply_without_rules_is_unchanged() {
    let link = link_with(TranslationRules::acp_defaults());
    let mut request = json!({"jsonrpc": "2.0", "id": "r", "method": "x/other", "params": {}});
    link.prepare_outbound(&mut request);

    let reply = json!({"jsonrpc": "2.0", "id": "r", "result": {"path": "/home/agent/workspace/a", "z": 1, "a": 2}});
    let delivered = forwarded(link.route_inbound(reply.clone()));

    assert_eq!(serde_json::to_string(&delivered).unwrap(), serde_json::to_string(&reply).unwrap());
}

/// Error replies are forwarded and release their tracking entry.
#[test]
fn error_reply_releases_request() {
    let link = link_with(echo_rules());
    let mut request = json!({"jsonrpc": "2.0", "id": 9, "method": "x/echo", "params": {}});
    link.prepare_outbound(&mut request);

    let reply = json!({"jsonrpc": "2.0", "id": 9, "error": {"code": -32601, "message": "nope"}});
    let delivered = forwarded(link.route_inbound(reply.clone()));

    assert_eq!(delivered, reply);
    assert_eq!(link.pending_editor_requests(), 0);
}

// ── Id space ─────────────────────────────────────────────────────────────────

/// An editor id that looks like a proxy id is aliased on the agent wire and
/// restored on the reply.
#[test]
fn editor_id_in_proxy_space_is_aliased_and_restored() {
    let link = link_with(TranslationRules::acp_defaults());
    let mut request = json!({"jsonrpc": "2.0", "id": "cai-acp-proxy-7", "method": "initialize", "params": {}});

    link.prepare_outbound(&mut request);
    let wire_id = request["id"].as_str().unwrap().to_owned();
    assert_ne!(wire_id, "cai-acp-proxy-7");
    assert!(wire_id.starts_with("cai-acp-proxy-editor-"), "{wire_id}");

    let reply = json!({"jsonrpc": "2.0", "id": wire_id, "result": {"ok": true}});
    let delivered = forwarded(link.route_inbound(reply));

    assert_eq!(delivered, json!({"jsonrpc": "2.0", "id": "cai-acp-proxy-7", "result": {"ok": true}}));
}

/// Ordinary editor ids reach the agent untouched.
#[test]
fn ordinary_editor_ids_are_not_aliased() {
    let link = link_with(TranslationRules::acp_defaults());
    let mut request = json!({"jsonrpc": "2.0", "id": 3, "method": "initialize", "params": {}});

    link.prepare_outbound(&mut request);

    assert_eq!(request["id"], 3);
}

/// A reply in the proxy's id space that nobody waits for is dropped.
#[test]
fn unclaimed_proxy_reply_is_consumed() {
    let link = link_with(TranslationRules::acp_defaults());
    let reply = json!({"jsonrpc": "2.0", "id": "cai-acp-proxy-3", "result": {}});

    assert!(matches!(link.route_inbound(reply), InboundRoute::Consumed));
}

/// Replies the proxy never tracked pass through.
#[test]
fn untracked_reply_is_forwarded() {
    let link = link_with(TranslationRules::acp_defaults());
    let reply = json!({"jsonrpc": "2.0", "id": 42, "result": {}});

    assert_eq!(forwarded(link.route_inbound(reply.clone())), reply);
}

// ── Bookkeeping ──────────────────────────────────────────────────────────────

/// Unanswered requests are forgotten when the link is cleared; notifications
/// are never tracked.
#[test]
fn unanswered_requests_are_cleared() {
    let link = link_with(TranslationRules::acp_defaults());
    let mut setup = json!({"jsonrpc": "2.0", "id": 1, "method": "session/new", "params": {"cwd": "/home/alice/proj"}});
    let mut note = json!({"jsonrpc": "2.0", "method": "session/cancel", "params": {"sessionId": "s"}});

    link.prepare_outbound(&mut setup);
    link.prepare_outbound(&mut note);
    assert_eq!(link.pending_editor_requests(), 1);

    link.clear_editor_requests();
    assert_eq!(link.pending_editor_requests(), 0);
}
