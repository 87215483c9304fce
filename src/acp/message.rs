//! JSON-RPC 2.0 envelope helpers.
//!
//! Messages travel through the proxy as [`serde_json::Value`] so that fields
//! the proxy does not understand survive byte-for-byte (key order is kept by
//! `serde_json`'s `preserve_order` feature). These helpers classify an
//! envelope and read or rewrite the handful of fields the proxy cares about.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Prefix of request ids minted by the proxy itself.
pub const PROXY_ID_PREFIX: &str = "cai-acp-proxy-";

/// Prefix of the ids that stand in for editor ids inside [`PROXY_ID_PREFIX`]'s
/// space. Never produced by [`RequestIdGenerator`].
pub const EDITOR_ALIAS_PREFIX: &str = "cai-acp-proxy-editor-";

/// Shape of a JSON-RPC envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and a non-null `id`.
    Request,
    /// Has `method` and no `id`.
    Notification,
    /// Has `id` and `result` or `error`, no `method`.
    Response,
    /// Anything else (batches, scalars, objects missing both shapes).
    Unknown,
}

/// Classify `message` by its envelope fields.
#[must_use]
pub fn classify(message: &Value) -> MessageKind {
    let Some(object) = message.as_object() else {
        return MessageKind::Unknown;
    };

    let has_id = object.get("id").is_some_and(|id| !id.is_null());
    if object.get("method").is_some_and(Value::is_string) {
        return if has_id {
            MessageKind::Request
        } else {
            MessageKind::Notification
        };
    }

    if object.contains_key("id") && (object.contains_key("result") || object.contains_key("error")) {
        MessageKind::Response
    } else {
        MessageKind::Unknown
    }
}

/// The `method` field, if present.
#[must_use]
pub fn method(message: &Value) -> Option<&str> {
    message.get("method").and_then(Value::as_str)
}

/// Correlation key for a JSON-RPC id.
///
/// String ids map to their text and every other id kind to its JSON form,
/// so `"7"` and `7` share a key. Editor ids that would collide with
/// [`PROXY_ID_PREFIX`] are aliased before they reach the agent.
#[must_use]
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Correlation key of `message`'s `id`, if it has one.
#[must_use]
pub fn message_id_key(message: &Value) -> Option<String> {
    message.get("id").filter(|id| !id.is_null()).map(id_key)
}

/// Whether a correlation key lies in the proxy's id space.
///
/// Editor aliases ([`EDITOR_ALIAS_PREFIX`]) are included; callers resolve
/// those first.
#[must_use]
pub fn is_proxy_issued(key: &str) -> bool {
    key.starts_with(PROXY_ID_PREFIX)
}

/// Alias id `n` for an editor request.
#[must_use]
pub fn editor_alias_id(n: u64) -> String {
    format!("{EDITOR_ALIAS_PREFIX}{n}")
}

/// Build a request envelope.
#[must_use]
pub fn request(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a notification envelope.
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// Mutable access to `params.sessionId` when it is a string.
pub fn params_session_id_mut(message: &mut Value) -> Option<&mut String> {
    match message.get_mut("params")?.get_mut("sessionId")? {
        Value::String(id) => Some(id),
        _ => None,
    }
}

/// Mutable access to `result.sessionId` when it is a string.
pub fn result_session_id_mut(message: &mut Value) -> Option<&mut String> {
    match message.get_mut("result")?.get_mut("sessionId")? {
        Value::String(id) => Some(id),
        _ => None,
    }
}

/// Mints request ids for proxy-issued requests: `cai-acp-proxy-1`, `-2`, …
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next id.
    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        format!("{PROXY_ID_PREFIX}{n}")
    }
}
