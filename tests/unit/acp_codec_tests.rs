//! Unit tests for ACP NDJSON framing, message reading, and writing.
//!
//! Covers:
//! - codec line splitting, partial delivery, and the max line length
//! - `parse_line` for valid, blank, and malformed input
//! - `MessageReader` over an in-memory stream
//! - `write_json_line` framing
//! - envelope helpers in `acp::message`

use bytes::BytesMut;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Decoder;

use cai_acp_proxy::acp::codec::{AcpCodec, MAX_LINE_BYTES};
use cai_acp_proxy::acp::message::{self, MessageKind};
use cai_acp_proxy::acp::reader::{parse_line, MessageReader};
use cai_acp_proxy::acp::writer::write_json_line;
use cai_acp_proxy::AppError;

// ── Codec ────────────────────────────────────────────────────────────────────

/// Two lines in one buffer decode as two items.
#[test]
fn batched_lines_are_split() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");

    assert_eq!(codec.decode(&mut buf).expect("first"), Some("{\"a\":1}".to_owned()));
    assert_eq!(codec.decode(&mut buf).expect("second"), Some("{\"b\":2}".to_owned()));
    assert_eq!(codec.decode(&mut buf).expect("empty"), None);
}

/// A line without its newline is held until the newline arrives.
#[test]
fn partial_line_is_buffered() {
    let mut codec = AcpCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"x\"");

    assert_eq!(codec.decode(&mut buf).expect("partial"), None);
    buf.extend_from_slice(b"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("complete"),
        Some("{\"method\":\"x\"}".to_owned())
    );
}

/// Lines over the limit are a protocol error.
#[test]
fn overlong_line_is_rejected() {
    let mut codec = AcpCodec::with_max_length(16);
    let mut buf = BytesMut::from("{\"long\":\"aaaaaaaaaaaaaaaaaaaa\"}\n");

    let err = codec.decode(&mut buf).expect_err("line exceeds limit");

    assert!(matches!(err, AppError::Acp(ref msg) if msg.contains("line too long")));
    assert_eq!(err.to_string(), "acp: line too long: exceeded 16 bytes");
}

/// Default limit is 1 MiB.
#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1024 * 1024);
    assert_eq!(AcpCodec::new().max_length(), MAX_LINE_BYTES);
    assert_eq!(AcpCodec::with_max_length(16).max_length(), 16);
}

// ── parse_line ───────────────────────────────────────────────────────────────

/// Blank and whitespace-only lines parse to nothing.
#[test]
fn blank_lines_are_skipped() {
    assert!(parse_line("").expect("empty").is_none());
    assert!(parse_line("   \t").expect("whitespace").is_none());
}

/// Malformed JSON is an ACP error.
#[test]
fn malformed_json_is_an_error() {
    let err = parse_line("{not json").expect_err("malformed");
    assert!(matches!(err, AppError::Acp(ref msg) if msg.starts_with("malformed json")));
}

/// Unknown fields survive parsing with their order intact.
#[test]
fn unknown_fields_are_preserved_in_order() {
    let raw = r#"{"z":1,"jsonrpc":"2.0","method":"x/y","a":{"k":[1,2]}}"#;
    let value = parse_line(raw).expect("valid").expect("non-blank");
    assert_eq!(serde_json::to_string(&value).expect("serialize"), raw);
}

// ── MessageReader ────────────────────────────────────────────────────────────

/// Messages are read in order, blank lines skipped, EOF reported as `None`.
#[tokio::test]
async fn reader_yields_messages_then_eof() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    tx.write_all(b"{\"id\":1,\"method\":\"a\"}\n\n{\"method\":\"b\"}\n")
        .await
        .expect("write");
    drop(tx);

    let mut reader = MessageReader::new(rx);
    let first = reader.next_message().await.expect("first").expect("some");
    let second = reader.next_message().await.expect("second").expect("some");
    let end = reader.next_message().await.expect("eof");

    assert_eq!(first["method"], "a");
    assert_eq!(second["method"], "b");
    assert!(end.is_none());
    assert_eq!(reader.lines_read(), 2);
}

/// A malformed line surfaces as an error from the reader.
#[tokio::test]
async fn reader_reports_malformed_line() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    tx.write_all(b"{\"ok\":true}\n{oops\n").await.expect("write");
    drop(tx);

    let mut reader = MessageReader::new(rx);
    assert!(reader.next_message().await.expect("first").is_some());
    assert!(matches!(reader.next_message().await, Err(AppError::Acp(_))));
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// A message is written as exactly one compact line.
#[tokio::test]
async fn writer_emits_one_line() {
    let mut out: Vec<u8> = Vec::new();
    let message = json!({"jsonrpc": "2.0", "id": 1, "result": {"text": "a\nb"}});

    write_json_line(&mut out, &message).await.expect("write");

    let text = String::from_utf8(out).expect("utf8");
    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 1, "embedded newlines must be escaped");
    assert_eq!(text.trim_end(), r#"{"jsonrpc":"2.0","id":1,"result":{"text":"a\nb"}}"#);
}

// ── Envelope helpers ─────────────────────────────────────────────────────────

/// Envelopes are classified by their fields.
#[test]
fn envelopes_are_classified() {
    assert_eq!(message::classify(&json!({"id": "x", "method": "m"})), MessageKind::Request);
    assert_eq!(message::classify(&json!({"method": "m"})), MessageKind::Notification);
    assert_eq!(message::classify(&json!({"id": 3, "result": null})), MessageKind::Response);
    assert_eq!(message::classify(&json!("text")), MessageKind::Unknown);
}

/// Numeric and string ids share a correlation key form.
#[test]
fn id_keys_normalize_kinds() {
    assert_eq!(message::id_key(&json!(7)), "7");
    assert_eq!(message::id_key(&json!("7")), "7");
    assert_eq!(message::message_id_key(&json!({"id": null})), None);
    assert_eq!(message::message_id_key(&json!({"id": "abc"})).as_deref(), Some("abc"));
}

/// Built requests and notifications carry the protocol version.
#[test]
fn builders_produce_jsonrpc_envelopes() {
    let request = message::request("cai-acp-proxy-1", "session/cancel", json!({}));
    let notification = message::notification("session/cancel", json!({"sessionId": "s"}));

    assert_eq!(request["jsonrpc"], message::JSONRPC_VERSION);
    assert_eq!(request["id"], "cai-acp-proxy-1");
    assert_eq!(message::classify(&request), MessageKind::Request);
    assert_eq!(message::classify(&notification), MessageKind::Notification);
    assert!(notification.get("id").is_none());
}

/// Session id accessors only match string ids.
#[test]
fn session_id_accessors() {
    let mut request = json!({"params": {"sessionId": "a"}});
    let mut response = json!({"result": {"sessionId": 5}});

    *message::params_session_id_mut(&mut request).expect("string id") = "b".into();

    assert_eq!(request["params"]["sessionId"], "b");
    assert!(message::result_session_id_mut(&mut response).is_none());
}
