//! Process-level wiring for one proxy invocation.
//!
//! Resolves the agent name, builds the proxy through a [`ProxyFactory`],
//! routes interrupts to [`AcpProxy::cancel`] while the proxy runs, and maps
//! the outcome to an exit code:
//!
//! | Outcome                              | Exit code | Stderr        |
//! |--------------------------------------|-----------|---------------|
//! | clean end                            | 0         | nothing       |
//! | cancelled after an interrupt         | 0         | nothing       |
//! | any other error                      | 1         | error message |

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::DEFAULT_AGENT;
use crate::interrupt::InterruptHandler;
use crate::proxy::{AcpProxy, EditorWriter};
use crate::AppError;

/// Builds a proxy for an agent name and an editor-facing writer.
pub trait ProxyFactory: Send + Sync {
    /// Create the proxy.
    ///
    /// # Errors
    ///
    /// Any construction error; the runner reports it and exits with 1.
    fn create(&self, agent_name: &str, editor_out: EditorWriter) -> crate::Result<Arc<AcpProxy>>;
}

impl<F> ProxyFactory for F
where
    F: Fn(&str, EditorWriter) -> crate::Result<Arc<AcpProxy>> + Send + Sync,
{
    fn create(&self, agent_name: &str, editor_out: EditorWriter) -> crate::Result<Arc<AcpProxy>> {
        self(agent_name, editor_out)
    }
}

/// Exit code for a failed run.
#[must_use]
pub fn exit_code_for(err: &AppError, cancel_requested: bool) -> i32 {
    if err.is_cancelled() && cancel_requested {
        0
    } else {
        1
    }
}

/// Runs one proxy against stdio.
pub struct AcpProxyRunner {
    factory: Box<dyn ProxyFactory>,
    interrupts: Arc<dyn InterruptHandler>,
    default_agent: String,
}

impl AcpProxyRunner {
    /// Create a runner with the built-in default agent.
    pub fn new(factory: impl ProxyFactory + 'static, interrupts: Arc<dyn InterruptHandler>) -> Self {
        Self {
            factory: Box::new(factory),
            interrupts,
            default_agent: DEFAULT_AGENT.to_owned(),
        }
    }

    /// Override the agent used when none is given.
    #[must_use]
    pub fn with_default_agent(mut self, agent: impl Into<String>) -> Self {
        self.default_agent = agent.into();
        self
    }

    /// `agent` if it is non-blank, otherwise the default agent.
    #[must_use]
    pub fn resolve_agent(&self, agent: Option<&str>) -> String {
        match agent {
            Some(name) if !name.trim().is_empty() => name.to_owned(),
            _ => self.default_agent.clone(),
        }
    }

    /// Run against the process's real stdin, stdout, and stderr.
    pub async fn run(&self, agent: Option<&str>) -> i32 {
        let mut stderr = tokio::io::stderr();
        self.run_with_io(agent, tokio::io::stdin(), Box::new(tokio::io::stdout()), &mut stderr)
            .await
    }

    /// Run against the given streams and return the exit code.
    pub async fn run_with_io<R, E>(
        &self,
        agent: Option<&str>,
        stdin: R,
        stdout: EditorWriter,
        stderr: &mut E,
    ) -> i32
    where
        R: AsyncRead + Unpin,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let agent = self.resolve_agent(agent);
        info!(agent = %agent, "runner: starting proxy");

        let proxy = match self.factory.create(&agent, stdout) {
            Ok(proxy) => proxy,
            Err(err) => return report(stderr, &err, false).await,
        };

        let target = Arc::clone(&proxy);
        let registration = match self.interrupts.install(Arc::new(move || target.cancel())) {
            Ok(registration) => registration,
            Err(err) => return report(stderr, &err, false).await,
        };

        let result = proxy.run(stdin).await;
        drop(registration);

        match result {
            Ok(code) => {
                info!(code, "runner: proxy finished");
                code
            }
            Err(err) => report(stderr, &err, proxy.is_cancel_requested()).await,
        }
    }
}

impl std::fmt::Debug for AcpProxyRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpProxyRunner")
            .field("default_agent", &self.default_agent)
            .finish_non_exhaustive()
    }
}

async fn report<E>(stderr: &mut E, err: &AppError, cancel_requested: bool) -> i32
where
    E: AsyncWrite + Unpin + ?Sized,
{
    let code = exit_code_for(err, cancel_requested);
    if code == 0 {
        debug!("runner: cancelled on request");
        return code;
    }

    debug!(error = %err, "runner: proxy failed");
    let line = format!("cai-acp-proxy: {err}\n");
    if stderr.write_all(line.as_bytes()).await.is_ok() {
        let _ = stderr.flush().await;
    }
    code
}
