//! Editor ⇄ agent ACP proxy.
//!
//! [`AcpProxy::run`] launches the agent, then drives two pumps:
//!
//! - **outbound** (editor stdin → agent stdin) runs on the caller's task;
//! - **inbound** (agent stdout → editor stdout) runs on a spawned task and is
//!   the only writer of the editor's stdout.
//!
//! The run ends on the first of:
//!
//! | Trigger              | Behaviour                                                   |
//! |----------------------|-------------------------------------------------------------|
//! | editor EOF           | close agent stdin, drain agent output for the grace period  |
//! | malformed editor msg | as EOF, then report the error                               |
//! | agent exit           | tear down, exit code 0                                      |
//! | malformed agent msg  | tear down, report the error                                 |
//! | [`AcpProxy::cancel`] | `session/cancel` to known sessions, tear down, `Cancelled`  |
//!
//! Every path ends in [`AcpSession::dispose`].

pub mod link;
pub mod pump;
pub mod session_map;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::message::{self, RequestIdGenerator};
use crate::acp::reader::MessageReader;
use crate::acp::session::DEFAULT_REQUEST_TIMEOUT;
use crate::acp::{AcpSession, AgentLauncher, AgentSpawner};
use crate::config::ProxyConfig;
use crate::translate::{PathTranslator, TranslationRules};
use crate::{AppError, Result};

pub use link::{InboundRoute, ProxyLink, SESSION_ESTABLISHING_METHODS};
pub use pump::{pump_inbound, pump_outbound, PumpEnd};
pub use session_map::SessionIdMap;

/// Write half of the editor connection (the proxy's stdout).
pub type EditorWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Notification sent to the agent for each known session on cancellation.
pub const SESSION_CANCEL_METHOD: &str = "session/cancel";

/// Upper bound on waiting for an in-flight outbound write after cancellation.
const OUTBOUND_SETTLE: Duration = Duration::from_secs(2);

/// Upper bound on each best-effort `session/cancel` write.
const CANCEL_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for a proxy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Deadline for [`AcpProxy::request`].
    pub request_timeout: Duration,
    /// How long agent output keeps flowing after the editor closes stdin.
    pub shutdown_grace: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl From<&ProxyConfig> for ProxyOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

enum Ending {
    Editor(Result<pump::PumpEnd>),
    Agent(Result<pump::PumpEnd>),
    Cancelled,
}

/// One proxy invocation: one agent, one editor connection.
pub struct AcpProxy {
    agent_name: String,
    translator: Arc<PathTranslator>,
    rules: Arc<TranslationRules>,
    launcher: Arc<dyn AgentLauncher>,
    options: ProxyOptions,
    editor_out: Mutex<Option<EditorWriter>>,
    cancel: CancellationToken,
    link: OnceLock<Arc<ProxyLink>>,
    ids: RequestIdGenerator,
}

impl AcpProxy {
    /// Create a proxy with the ACP default translation rules.
    ///
    /// `editor_out` receives every agent message bound for the editor.
    pub fn new(
        agent_name: impl Into<String>,
        translator: PathTranslator,
        launcher: Arc<dyn AgentLauncher>,
        editor_out: EditorWriter,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            translator: Arc::new(translator),
            rules: Arc::new(TranslationRules::acp_defaults()),
            launcher,
            options: ProxyOptions::default(),
            editor_out: Mutex::new(Some(editor_out)),
            cancel: CancellationToken::new(),
            link: OnceLock::new(),
            ids: RequestIdGenerator::new(),
        }
    }

    /// Replace the translation rules.
    #[must_use]
    pub fn with_rules(mut self, rules: TranslationRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    /// Replace the timing options.
    #[must_use]
    pub fn with_options(mut self, options: ProxyOptions) -> Self {
        self.options = options;
        self
    }

    /// Build a proxy that spawns real agents as configured.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidArgument`] if `workspace` cannot be used as the
    ///   host root or the container root is not absolute.
    /// - [`AppError::Config`] if a configured translation rule is invalid.
    pub fn from_config(
        config: &ProxyConfig,
        workspace: &Path,
        agent_name: &str,
        editor_out: EditorWriter,
    ) -> Result<Self> {
        let translator = PathTranslator::new(workspace, &config.container_workspace_root)?;
        let rules = config.translation_rules()?;
        let launcher = Arc::new(AgentSpawner::new(config.spawn_config()));
        Ok(Self::new(agent_name, translator, launcher, editor_out)
            .with_rules(rules)
            .with_options(ProxyOptions::from(config)))
    }

    /// Agent CLI name.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Host workspace root the agent is launched for.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.translator.normalized_host_root()
    }

    /// Path translator in use.
    #[must_use]
    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    /// Proxy-assigned id of the running session, once the agent is up.
    #[must_use]
    pub fn proxy_session_id(&self) -> Option<String> {
        self.link.get().map(|link| link.session().proxy_session_id().to_owned())
    }

    /// The running session, once the agent is up.
    #[must_use]
    pub fn session(&self) -> Option<Arc<AcpSession>> {
        self.link.get().map(|link| Arc::clone(link.session()))
    }

    /// Request cooperative shutdown. Idempotent; safe before or during `run`.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(agent = %self.agent_name, "proxy: cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Whether [`AcpProxy::cancel`] has been called.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Issue a request from the proxy itself and wait for the agent's reply.
    ///
    /// Params are translated like editor traffic. Returns `Ok(None)` on
    /// timeout or cancellation.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidOperation`] if the agent is not running.
    /// - Write errors from the session.
    pub async fn request(&self, method: &str, params: Value) -> Result<Option<Value>> {
        self.request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    /// [`AcpProxy::request`] with an explicit deadline.
    ///
    /// # Errors
    ///
    /// As [`AcpProxy::request`].
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let link = self
            .link
            .get()
            .ok_or_else(|| AppError::InvalidOperation("proxy is not running".into()))?;

        let id = self.ids.next_id();
        let mut request = message::request(&id, method, params);
        link.translate_outbound(&mut request);
        debug!(id = %id, method, "proxy: issuing request");
        link.session().send_and_wait(&request, &id, timeout).await
    }

    /// Launch the agent and proxy traffic until the editor disconnects, the
    /// agent exits, or [`AcpProxy::cancel`] is called.
    ///
    /// Returns the process exit code (`0`) on a clean end.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidOperation`] if called more than once.
    /// - [`AppError::Cancelled`] after [`AcpProxy::cancel`].
    /// - Spawn errors from the launcher.
    /// - [`AppError::Acp`] when either stream carries malformed JSON.
    pub async fn run<R>(&self, editor_in: R) -> Result<i32>
    where
        R: AsyncRead + Unpin,
    {
        let editor_out = self
            .editor_out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::InvalidOperation("proxy has already run".into()))?;

        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let workspace = self.workspace().to_path_buf();
        let spawned = self.launcher.launch(&workspace, &self.agent_name).await?;
        let session = Arc::new(AcpSession::new(
            workspace,
            spawned.process,
            spawned.stdin,
            self.cancel.child_token(),
        ));
        let link = Arc::new(ProxyLink::new(
            Arc::clone(&session),
            Arc::clone(&self.translator),
            Arc::clone(&self.rules),
        ));
        if self.link.set(Arc::clone(&link)).is_err() {
            return Err(AppError::InvalidOperation("proxy has already run".into()));
        }

        let token = session.cancellation_token().clone();
        let (inbound_tx, mut inbound_rx) = oneshot::channel();
        let inbound_link = Arc::clone(&link);
        let inbound_token = token.clone();
        let agent_out = spawned.stdout;
        session.attach_reader(tokio::spawn(async move {
            let mut agent = MessageReader::new(agent_out);
            let mut editor = editor_out;
            let result = pump_inbound(&inbound_link, &mut agent, &mut editor, &inbound_token).await;
            let _ = inbound_tx.send(result);
        }));

        let mut editor = MessageReader::new(editor_in);
        let outbound = pump_outbound(&link, &mut editor, &token);
        tokio::pin!(outbound);

        let ending = tokio::select! {
            biased;
            () = token.cancelled() => Ending::Cancelled,
            result = &mut inbound_rx => Ending::Agent(flatten_inbound(result)),
            result = &mut outbound => Ending::Editor(result),
        };

        let outcome = match ending {
            Ending::Editor(result) if !token.is_cancelled() => {
                session.close_agent_input().await;
                let drained = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    result = &mut inbound_rx => Some(flatten_inbound(result)),
                    () = tokio::time::sleep(self.options.shutdown_grace) => {
                        warn!(
                            grace_ms = u64::try_from(self.options.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                            "proxy: agent still running after editor closed"
                        );
                        Some(Ok(PumpEnd::Eof))
                    }
                };
                match (result, drained) {
                    (Err(err), _) => Err(err),
                    (Ok(_), Some(Err(err))) => Err(err),
                    (Ok(_), Some(Ok(_))) => Ok(0),
                    (Ok(_), None) => Err(AppError::Cancelled),
                }
            }
            Ending::Agent(result) if !token.is_cancelled() => {
                info!("proxy: agent output ended");
                result.map(|_| 0)
            }
            Ending::Editor(_) => {
                self.notify_cancel(&link).await;
                Err(AppError::Cancelled)
            }
            Ending::Agent(_) | Ending::Cancelled => {
                // Let an in-flight editor message finish before notifying.
                if tokio::time::timeout(OUTBOUND_SETTLE, &mut outbound).await.is_err() {
                    warn!("proxy: outbound write did not settle after cancellation");
                }
                self.notify_cancel(&link).await;
                Err(AppError::Cancelled)
            }
        };

        link.clear_editor_requests();
        session.dispose().await;
        info!(
            session_id = %session.proxy_session_id(),
            ok = outcome.is_ok(),
            "proxy: run finished"
        );
        outcome
    }

    async fn notify_cancel(&self, link: &ProxyLink) {
        for agent_id in link.sessions().agent_ids() {
            let notification = message::notification(SESSION_CANCEL_METHOD, json!({ "sessionId": agent_id }));
            match tokio::time::timeout(CANCEL_NOTIFY_TIMEOUT, link.session().write_to_agent(&notification)).await {
                Ok(Ok(())) => debug!(agent_session_id = %agent_id, "proxy: session/cancel sent"),
                Ok(Err(err)) => debug!(agent_session_id = %agent_id, error = %err, "proxy: session/cancel not delivered"),
                Err(_) => debug!(agent_session_id = %agent_id, "proxy: session/cancel timed out"),
            }
        }
    }
}

impl std::fmt::Debug for AcpProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpProxy")
            .field("agent_name", &self.agent_name)
            .field("workspace", &self.workspace())
            .field("options", &self.options)
            .field("cancel_requested", &self.is_cancel_requested())
            .finish_non_exhaustive()
    }
}

fn flatten_inbound(result: std::result::Result<Result<PumpEnd>, oneshot::error::RecvError>) -> Result<PumpEnd> {
    result.unwrap_or_else(|_| Err(AppError::Acp("inbound pump stopped unexpectedly".into())))
}

/// Host workspace root for a proxy: `workspace` if given, else the current
/// directory, canonicalized.
///
/// # Errors
///
/// [`AppError::InvalidArgument`] if the directory does not exist.
pub fn resolve_workspace(workspace: Option<&Path>) -> Result<PathBuf> {
    let raw = match workspace {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    raw.canonicalize().map_err(|err| {
        AppError::InvalidArgument(format!("workspace '{}' is not usable: {err}", raw.display()))
    })
}
