//! ACP agent process spawner.
//!
//! Starts the agent CLI in ACP mode, either directly (`<agent> --acp`) or
//! through the sandbox CLI, which runs it inside the workspace container:
//!
//! ```text
//! cai exec --workspace <workspace> --quiet -- <agent> --acp
//! ```
//!
//! The argument vector is passed to the OS verbatim; no shell ever sees the
//! workspace path. In sandboxed mode `CAI_NO_UPDATE_CHECK=1` is set on the
//! child only, so the sandbox CLI never prints update notices onto the
//! JSON-RPC stream.
//!
//! The agent's stderr is relayed line by line to the proxy's own stderr by a
//! detached task. Relay failures are ignored.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{AppError, Result};

/// Flag that switches the agent CLI into ACP stdio mode.
pub const AGENT_ACP_FLAG: &str = "--acp";

/// Default sandbox CLI used in sandboxed mode.
pub const DEFAULT_SANDBOX_COMMAND: &str = "cai";

/// Environment variable that silences the sandbox CLI's update check.
pub const NO_UPDATE_CHECK_ENV: &str = "CAI_NO_UPDATE_CHECK";

/// Longest stderr chunk the relay buffers before forwarding it.
pub const STDERR_CHUNK_BYTES: u64 = 8 * 1024;

// ── Process abstraction ──────────────────────────────────────────────────────

/// Write half of an agent connection (the agent's stdin).
pub type AgentWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of an agent connection (the agent's stdout).
pub type AgentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to a running agent process.
///
/// Implemented for [`tokio::process::Child`]; tests substitute in-memory
/// fakes so kill/wait behaviour can be observed.
pub trait AgentProcess: Send + fmt::Debug {
    /// OS process id, if the process is still known to the OS.
    fn id(&self) -> Option<u32>;

    /// Ask the OS to kill the process without waiting for it.
    ///
    /// # Errors
    ///
    /// I/O errors from the OS, including "process already exited".
    fn start_kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit and return its exit code, if any.
    fn wait(&mut self) -> Pin<Box<dyn Future<Output = io::Result<Option<i32>>> + Send + '_>>;
}

impl AgentProcess for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = io::Result<Option<i32>>> + Send + '_>> {
        Box::pin(async move { Child::wait(self).await.map(|status| status.code()) })
    }
}

/// A started agent: its process handle plus the protocol pipes.
pub struct SpawnedAgent {
    /// Exclusively owned process handle.
    pub process: Box<dyn AgentProcess>,
    /// Agent stdin.
    pub stdin: AgentWriter,
    /// Agent stdout.
    pub stdout: AgentReader,
}

impl fmt::Debug for SpawnedAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedAgent")
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// Anything that can start an agent for a workspace.
pub trait AgentLauncher: Send + Sync {
    /// Start `agent_name` for `workspace`.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidArgument`] for an unusable agent name and
    /// [`AppError::Spawn`] when the process cannot be created.
    fn launch<'a>(
        &'a self,
        workspace: &'a Path,
        agent_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedAgent>> + Send + 'a>>;
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Configuration for spawning an ACP agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Run the agent directly instead of through the sandbox CLI.
    pub direct_spawn: bool,
    /// Sandbox CLI binary used when `direct_spawn` is false.
    pub sandbox_command: String,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            direct_spawn: false,
            sandbox_command: DEFAULT_SANDBOX_COMMAND.to_owned(),
        }
    }
}

/// Fully resolved program, arguments, and environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: String,
    /// Literal argument vector.
    pub args: Vec<String>,
    /// Environment variables set on the child only.
    pub env: Vec<(String, String)>,
}

impl SpawnConfig {
    /// Resolve the command line for `agent_name` in `workspace`.
    #[must_use]
    pub fn launch_spec(&self, workspace: &Path, agent_name: &str) -> LaunchSpec {
        if self.direct_spawn {
            return LaunchSpec {
                program: agent_name.to_owned(),
                args: vec![AGENT_ACP_FLAG.to_owned()],
                env: Vec::new(),
            };
        }

        LaunchSpec {
            program: self.sandbox_command.clone(),
            args: vec![
                "exec".to_owned(),
                "--workspace".to_owned(),
                workspace.to_string_lossy().into_owned(),
                "--quiet".to_owned(),
                "--".to_owned(),
                agent_name.to_owned(),
                AGENT_ACP_FLAG.to_owned(),
            ],
            env: vec![(NO_UPDATE_CHECK_ENV.to_owned(), "1".to_owned())],
        }
    }
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Starts real agent processes.
#[derive(Debug, Clone, Default)]
pub struct AgentSpawner {
    config: SpawnConfig,
}

impl AgentSpawner {
    /// Create a spawner.
    #[must_use]
    pub fn new(config: SpawnConfig) -> Self {
        Self { config }
    }

    /// Spawner configuration.
    #[must_use]
    pub fn config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Spawn the agent with piped stdio and start relaying its stderr.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidArgument`] if `agent_name` is blank or looks like
    ///   an option.
    /// - [`AppError::Spawn`] naming the agent if the OS cannot start the
    ///   process, or a pipe could not be captured.
    pub fn spawn(&self, workspace: &Path, agent_name: &str) -> Result<SpawnedAgent> {
        validate_agent_name(agent_name)?;

        let spec = self.config.launch_spec(workspace, agent_name);
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            program = %spec.program,
            args = ?spec.args,
            direct = self.config.direct_spawn,
            "spawning agent process"
        );

        let mut child = cmd.spawn().map_err(|err| {
            error!(program = %spec.program, error = %err, "failed to spawn agent process");
            AppError::Spawn(format!("failed to start agent '{agent_name}': {err}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn(format!("failed to capture stdin of agent '{agent_name}'")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn(format!("failed to capture stdout of agent '{agent_name}'")))?;

        if let Some(stderr) = child.stderr.take() {
            // Detached: the task ends when the agent closes its stderr.
            drop(forward_stderr(stderr, tokio::io::stderr()));
        }

        info!(pid = child.id().unwrap_or(0), agent = agent_name, "agent process spawned");

        Ok(SpawnedAgent {
            process: Box::new(child),
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
        })
    }
}

impl AgentLauncher for AgentSpawner {
    fn launch<'a>(
        &'a self,
        workspace: &'a Path,
        agent_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SpawnedAgent>> + Send + 'a>> {
        Box::pin(async move { self.spawn(workspace, agent_name) })
    }
}

/// Reject agent names that cannot be a program name.
///
/// # Errors
///
/// [`AppError::InvalidArgument`] for blank names, names with surrounding
/// whitespace, and names starting with `-`.
pub fn validate_agent_name(agent_name: &str) -> Result<()> {
    if agent_name.trim().is_empty() {
        return Err(AppError::InvalidArgument("agent name must not be empty".into()));
    }
    if agent_name.trim() != agent_name {
        return Err(AppError::InvalidArgument(format!(
            "agent name must not have surrounding whitespace: '{agent_name}'"
        )));
    }
    if agent_name.starts_with('-') {
        return Err(AppError::InvalidArgument(format!(
            "agent name must not start with '-': '{agent_name}'"
        )));
    }
    Ok(())
}

// ── Stderr relay ─────────────────────────────────────────────────────────────

/// Copy `source` to `sink` line by line until EOF or the first I/O error.
///
/// Lines longer than [`STDERR_CHUNK_BYTES`] are forwarded in pieces of at
/// most that size. Bytes are forwarded verbatim (no UTF-8 requirement).
/// Errors end the task silently.
pub fn forward_stderr<R, W>(source: R, sink: W) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        let mut sink = sink;
        let mut line = Vec::new();
        let mut line_count: u64 = 0;

        loop {
            line.clear();
            match (&mut reader).take(STDERR_CHUNK_BYTES).read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    line_count += 1;
                    if sink.write_all(&line).await.is_err() || sink.flush().await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "agent stderr: read failed, stopping relay");
                    break;
                }
            }
        }

        debug!(total_lines = line_count, "agent stderr: stream ended");
    })
}
