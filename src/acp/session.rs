//! ACP session: one agent process and its in-flight request bookkeeping.
//!
//! # Correlation
//!
//! Proxy-issued requests are correlated with their replies through a
//! concurrent table of one-shot slots keyed by request id. A slot is
//! registered **before** the request bytes are written, so a reply that
//! arrives while the write is still returning always finds its slot. Slots
//! are removed on every exit path (reply, timeout, cancellation, write
//! failure), so a late reply can never be delivered to a later caller.
//!
//! # Teardown
//!
//! [`AcpSession::dispose`] is the single teardown path. An atomic flag makes
//! it idempotent, so normal exit, faults, and explicit cancellation can all
//! call it and the agent process is killed exactly once.
//!
//! | State        | Entered by                                  |
//! |--------------|---------------------------------------------|
//! | `Active`     | construction                                |
//! | `Cancelling` | [`AcpSession::cancel`] or token cancelled   |
//! | `Disposed`   | [`AcpSession::dispose`]                     |

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acp::spawner::{AgentProcess, AgentWriter};
use crate::acp::writer::write_json_line;
use crate::{AppError, Result};

/// Default deadline for [`AcpSession::send_and_wait`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `dispose` waits for a killed agent to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting traffic.
    Active,
    /// Cancellation requested; teardown pending.
    Cancelling,
    /// Torn down; the agent has been killed.
    Disposed,
}

/// Slot payload: `Some(response)` on reply, `None` when cancelled.
type PendingSlot = oneshot::Sender<Option<Value>>;

/// One proxied agent process.
pub struct AcpSession {
    proxy_session_id: String,
    agent_session_id: RwLock<Option<String>>,
    workspace: PathBuf,
    writer: Mutex<Option<AgentWriter>>,
    process: StdMutex<Option<Box<dyn AgentProcess>>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    pending: DashMap<String, PendingSlot>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl AcpSession {
    /// Take ownership of a started agent.
    ///
    /// `cancel` becomes the session's root token; pass a child of a wider
    /// token to make the session cancellable from outside.
    pub fn new(
        workspace: impl Into<PathBuf>,
        process: Box<dyn AgentProcess>,
        stdin: AgentWriter,
        cancel: CancellationToken,
    ) -> Self {
        let proxy_session_id = Uuid::new_v4().to_string();
        let workspace = workspace.into();
        info!(
            session_id = %proxy_session_id,
            workspace = %workspace.display(),
            pid = process.id().unwrap_or(0),
            "acp session: created"
        );

        Self {
            proxy_session_id,
            agent_session_id: RwLock::new(None),
            workspace,
            writer: Mutex::new(Some(stdin)),
            process: StdMutex::new(Some(process)),
            reader_task: StdMutex::new(None),
            pending: DashMap::new(),
            cancel,
            disposed: AtomicBool::new(false),
        }
    }

    /// Proxy-assigned session id; stable for the lifetime of the session.
    #[must_use]
    pub fn proxy_session_id(&self) -> &str {
        &self.proxy_session_id
    }

    /// Agent-assigned session id, once the agent has reported it.
    #[must_use]
    pub fn agent_session_id(&self) -> Option<String> {
        self.agent_session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the agent-assigned session id.
    pub fn set_agent_session_id(&self, agent_session_id: &str) {
        *self
            .agent_session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(agent_session_id.to_owned());
        debug!(
            session_id = %self.proxy_session_id,
            agent_session_id,
            "acp session: agent session id recorded"
        );
    }

    /// Host-side workspace root.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Session cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.disposed.load(Ordering::Acquire) {
            SessionState::Disposed
        } else if self.cancel.is_cancelled() {
            SessionState::Cancelling
        } else {
            SessionState::Active
        }
    }

    /// Number of outstanding correlation slots.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a slot is registered for `request_id`.
    #[must_use]
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Hand the task draining the agent's stdout to the session.
    ///
    /// `dispose` aborts it if it is still running.
    pub fn attach_reader(&self, handle: JoinHandle<()>) {
        if let Some(previous) = lock(&self.reader_task).replace(handle) {
            previous.abort();
        }
    }

    /// Write one message to the agent as a single NDJSON line.
    ///
    /// Concurrent callers are serialised by the write lock; messages never
    /// interleave.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidOperation`] if the agent's stdin has been closed.
    /// - I/O errors if the write fails.
    pub async fn write_to_agent(&self, message: &Value) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(AppError::InvalidOperation(
                "agent input is closed".into(),
            ));
        };

        write_json_line(writer, message).await.map_err(|err| {
            warn!(
                session_id = %self.proxy_session_id,
                error = %err,
                "acp session: write to agent failed"
            );
            err
        })
    }

    /// Close the agent's stdin so it observes EOF.
    ///
    /// Waits for any in-flight write to finish first.
    pub async fn close_agent_input(&self) {
        if self.writer.lock().await.take().is_some() {
            debug!(session_id = %self.proxy_session_id, "acp session: agent input closed");
        }
    }

    /// Send `request` and wait for the reply with the same `request_id`.
    ///
    /// Returns `Ok(None)` when `timeout` elapses or the session is cancelled;
    /// an error *response* from the agent is a normal `Ok(Some(_))`.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidOperation`] if `request_id` is already pending.
    /// - Errors from [`AcpSession::write_to_agent`]; the slot is released.
    pub async fn send_and_wait(
        &self,
        request: &Value,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        match self.pending.entry(request_id.to_owned()) {
            Entry::Occupied(_) => {
                return Err(AppError::InvalidOperation(format!(
                    "request id '{request_id}' is already pending"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        if let Err(err) = self.write_to_agent(request).await {
            self.release(request_id);
            return Err(err);
        }

        let outcome = tokio::select! {
            reply = rx => reply.ok().flatten(),
            () = tokio::time::sleep(timeout) => {
                debug!(
                    session_id = %self.proxy_session_id,
                    id = request_id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "acp session: request timed out"
                );
                None
            }
            () = self.cancel.cancelled() => None,
        };

        self.release(request_id);
        Ok(outcome)
    }

    /// Deliver `response` to the caller waiting on `request_id`.
    ///
    /// Returns `false`, dropping the response, when no caller is waiting
    /// (unknown id, already completed, or timed out).
    pub fn try_complete(&self, request_id: &str, response: Value) -> bool {
        match self.pending.remove(request_id) {
            Some((_, slot)) => slot.send(Some(response)).is_ok(),
            None => {
                debug!(
                    session_id = %self.proxy_session_id,
                    id = request_id,
                    "acp session: no pending request for response"
                );
                false
            }
        }
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(session_id = %self.proxy_session_id, "acp session: cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Tear the session down. Idempotent; only the first call has an effect.
    ///
    /// Resolves every pending slot as cancelled, cancels the token, kills the
    /// agent (errors are ignored; it may already have exited), closes the
    /// agent's stdin, and aborts the reader task if still running.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let keys: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, slot)) = self.pending.remove(&key) {
                let _ = slot.send(None);
            }
        }
        self.pending.clear();
        self.cancel.cancel();

        let process = lock(&self.process).take();
        if let Some(mut process) = process {
            if let Err(err) = process.start_kill() {
                debug!(
                    session_id = %self.proxy_session_id,
                    error = %err,
                    "acp session: kill failed (agent already exited?)"
                );
            }
            match tokio::time::timeout(KILL_WAIT, process.wait()).await {
                Ok(Ok(code)) => debug!(session_id = %self.proxy_session_id, ?code, "acp session: agent reaped"),
                Ok(Err(err)) => debug!(session_id = %self.proxy_session_id, error = %err, "acp session: wait failed"),
                Err(_) => warn!(session_id = %self.proxy_session_id, "acp session: agent did not exit after kill"),
            }
        }

        drop(self.writer.lock().await.take());

        if let Some(handle) = lock(&self.reader_task).take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        info!(session_id = %self.proxy_session_id, "acp session: disposed");
    }

    /// Remove our own slot for `request_id`.
    ///
    /// Our receiver is gone by now, so our sender reports closed; a slot
    /// registered under the same id by a later caller is left alone.
    fn release(&self, request_id: &str) {
        self.pending.remove_if(request_id, |_, slot| slot.is_closed());
    }
}

impl fmt::Debug for AcpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcpSession")
            .field("proxy_session_id", &self.proxy_session_id)
            .field("agent_session_id", &self.agent_session_id())
            .field("workspace", &self.workspace)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
