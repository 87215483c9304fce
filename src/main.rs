#![forbid(unsafe_code)]

//! `cai-acp-proxy`: ACP stdio proxy binary.
//!
//! Stdout carries the JSON-RPC stream to the editor; all diagnostics go to
//! stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use cai_acp_proxy::interrupt::CtrlCHandler;
use cai_acp_proxy::proxy::{resolve_workspace, AcpProxy, EditorWriter};
use cai_acp_proxy::runner::AcpProxyRunner;
use cai_acp_proxy::{AppError, ProxyConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cai-acp-proxy", about = "ACP stdio proxy for containerized agents", version, long_about = None)]
struct Cli {
    /// Agent CLI to run (defaults to the configured agent).
    agent: Option<String>,

    /// Host workspace root; defaults to the current directory.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the agent directly instead of inside the sandbox.
    #[arg(long)]
    direct: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() {
    let args = Cli::parse();
    let code = match bootstrap(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cai-acp-proxy: {err}");
            1
        }
    };
    std::process::exit(code);
}

fn bootstrap(args: Cli) -> Result<i32> {
    init_tracing(args.log_format)?;

    let mut config = match &args.config {
        Some(path) => ProxyConfig::load_from_path(path)?,
        None => ProxyConfig::default(),
    };
    config.apply_env_overrides();
    if args.direct {
        config.direct_spawn = true;
    }
    let workspace = resolve_workspace(args.workspace.as_deref())?;
    info!(
        workspace = %workspace.display(),
        direct = config.direct_spawn,
        "cai-acp-proxy bootstrap"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    let default_agent = config.default_agent.clone();
    let runner = AcpProxyRunner::new(factory(config, workspace), Arc::new(CtrlCHandler))
        .with_default_agent(default_agent);
    let code = runtime.block_on(runner.run(args.agent.as_deref()));

    // A blocking stdin read would otherwise hold shutdown open.
    runtime.shutdown_background();
    Ok(code)
}

fn factory(
    config: ProxyConfig,
    workspace: PathBuf,
) -> impl Fn(&str, EditorWriter) -> Result<Arc<AcpProxy>> + Send + Sync {
    move |agent: &str, editor_out: EditorWriter| {
        AcpProxy::from_config(&config, Path::new(&workspace), agent, editor_out).map(Arc::new)
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
