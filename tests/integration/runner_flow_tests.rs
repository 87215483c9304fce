//! Runner tests: interrupts, exit codes, and stderr reporting with a
//! scripted agent behind the proxy.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use cai_acp_proxy::acp::reader::MessageReader;
use cai_acp_proxy::acp::writer::write_json_line;
use cai_acp_proxy::interrupt::ManualInterrupt;
use cai_acp_proxy::proxy::{AcpProxy, EditorWriter};
use cai_acp_proxy::runner::AcpProxyRunner;
use cai_acp_proxy::Result;

use super::test_helpers::{fast_options, translator, MockLauncher, PIPE_CAPACITY};

fn runner_with(launcher: Arc<MockLauncher>, interrupts: ManualInterrupt) -> AcpProxyRunner {
    let factory = move |agent: &str, editor_out: EditorWriter| -> Result<Arc<AcpProxy>> {
        Ok(Arc::new(
            AcpProxy::new(agent, translator(), launcher.clone(), editor_out).with_options(fast_options()),
        ))
    };
    AcpProxyRunner::new(factory, Arc::new(interrupts))
}

/// An interrupt cancels the proxy and the runner exits 0 quietly.
#[tokio::test]
async fn interrupt_cancels_and_exits_zero() {
    let (launcher, _log) = MockLauncher::new();
    let interrupts = ManualInterrupt::new();
    let runner = runner_with(Arc::clone(&launcher), interrupts.clone());

    let (mut editor_in, stdin) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdout, editor_out) = tokio::io::duplex(PIPE_CAPACITY);
    let mut editor_out = MessageReader::new(editor_out);

    let run = tokio::spawn(async move {
        let mut stderr: Vec<u8> = Vec::new();
        let code = runner.run_with_io(None, stdin, Box::new(stdout), &mut stderr).await;
        (code, stderr)
    });

    // Prove the proxy is up before interrupting.
    write_json_line(&mut editor_in, &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await
        .unwrap();
    let response = editor_out.next_message().await.unwrap().unwrap();
    assert_eq!(response["id"], 1);

    assert!(interrupts.trigger(), "handler installed while running");

    let (code, stderr) = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("runner finishes")
        .expect("runner task does not panic");
    assert_eq!(code, 0);
    assert!(stderr.is_empty(), "{}", String::from_utf8_lossy(&stderr));
    assert!(!interrupts.is_installed(), "handler removed after the run");
    assert_eq!(launcher.kill_count(), 1);
    assert_eq!(launcher.launches.lock().unwrap()[0].1, "claude", "default agent used");
}

/// Editor EOF ends the run with exit code 0.
#[tokio::test]
async fn editor_eof_exits_zero() {
    let (launcher, _log) = MockLauncher::new();
    let runner = runner_with(Arc::clone(&launcher), ManualInterrupt::new());
    let (stdout, _editor_out) = tokio::io::duplex(PIPE_CAPACITY);
    let mut stderr: Vec<u8> = Vec::new();

    let code = runner
        .run_with_io(Some("gemini"), tokio::io::empty(), Box::new(stdout), &mut stderr)
        .await;

    assert_eq!(code, 0);
    assert!(stderr.is_empty());
    assert_eq!(launcher.launches.lock().unwrap()[0].1, "gemini");
}

/// A launch failure is printed and exits 1.
#[tokio::test]
async fn launch_failure_exits_one() {
    let launcher = MockLauncher::failing("not found");
    let runner = runner_with(launcher, ManualInterrupt::new());
    let (stdout, _editor_out) = tokio::io::duplex(PIPE_CAPACITY);
    let (_editor_in, stdin) = tokio::io::duplex(PIPE_CAPACITY);
    let mut stderr: Vec<u8> = Vec::new();

    let code = runner
        .run_with_io(Some("ghost"), stdin, Box::new(stdout), &mut stderr)
        .await;

    assert_eq!(code, 1);
    let text = String::from_utf8(stderr).unwrap();
    assert!(text.contains("spawn: failed to start agent 'ghost'"), "{text}");
}
