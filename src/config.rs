//! Proxy configuration parsing, validation, and environment overrides.
//!
//! Every key is optional; an absent file yields [`ProxyConfig::default`].
//!
//! ```toml
//! container_workspace_root = "/home/agent/workspace"
//! default_agent = "claude"
//! direct_spawn = false
//! sandbox_command = "cai"
//! request_timeout_seconds = 30
//! shutdown_grace_seconds = 5
//!
//! [[translation]]
//! direction = "inbound"
//! method = "x/open_file"
//! field = "params.path"
//! kind = "path"
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::acp::spawner::{SpawnConfig, DEFAULT_SANDBOX_COMMAND};
use crate::translate::{RuleSpec, TranslationRules, DEFAULT_CONTAINER_WORKSPACE};
use crate::{AppError, Result};

/// Environment variable that forces direct (unsandboxed) agent spawning.
pub const DIRECT_SPAWN_ENV: &str = "CAI_ACP_DIRECT_SPAWN";

/// Agent started when none is named on the command line.
pub const DEFAULT_AGENT: &str = "claude";

fn default_container_workspace_root() -> String {
    DEFAULT_CONTAINER_WORKSPACE.into()
}

fn default_agent() -> String {
    DEFAULT_AGENT.into()
}

fn default_sandbox_command() -> String {
    DEFAULT_SANDBOX_COMMAND.into()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// Proxy configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ProxyConfig {
    /// Workspace root inside the container.
    #[serde(default = "default_container_workspace_root")]
    pub container_workspace_root: String,
    /// Agent used when none is given on the command line.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Run the agent directly instead of through the sandbox CLI.
    #[serde(default)]
    pub direct_spawn: bool,
    /// Sandbox CLI binary.
    #[serde(default = "default_sandbox_command")]
    pub sandbox_command: String,
    /// Deadline for proxy-issued requests.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// How long agent output keeps flowing after the editor disconnects.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Extra translation rules on top of the ACP defaults.
    #[serde(default)]
    pub translation: Vec<RuleSpec>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            container_workspace_root: default_container_workspace_root(),
            default_agent: default_agent(),
            direct_spawn: false,
            sandbox_command: default_sandbox_command(),
            request_timeout_seconds: default_request_timeout_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            translation: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        debug!(path = %path.display(), "config: loaded");
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply overrides read through `lookup`.
    ///
    /// `CAI_ACP_DIRECT_SPAWN` set to `1`, `true`, or `yes` (any case) enables
    /// direct spawning. Any other value is ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = lookup(DIRECT_SPAWN_ENV) else {
            return;
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => {
                debug!(env = DIRECT_SPAWN_ENV, "config: direct spawn enabled by environment");
                self.direct_spawn = true;
            }
            "" | "0" | "false" | "no" => {}
            other => warn!(env = DIRECT_SPAWN_ENV, value = other, "config: unrecognised value ignored"),
        }
    }

    /// Deadline for proxy-issued requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Grace period for draining agent output after editor EOF.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Spawner settings derived from this configuration.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            direct_spawn: self.direct_spawn,
            sandbox_command: self.sandbox_command.clone(),
        }
    }

    /// ACP default rules plus the configured extras.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a configured rule does not parse.
    pub fn translation_rules(&self) -> Result<TranslationRules> {
        let mut rules = TranslationRules::acp_defaults();
        rules
            .extend_from_specs(&self.translation)
            .map_err(|err| AppError::Config(format!("invalid translation rule: {err}")))?;
        Ok(rules)
    }

    fn validate(&self) -> Result<()> {
        if !self.container_workspace_root.starts_with('/') {
            return Err(AppError::Config(format!(
                "container_workspace_root must be an absolute path: '{}'",
                self.container_workspace_root
            )));
        }

        if self.default_agent.trim().is_empty() {
            return Err(AppError::Config("default_agent must not be empty".into()));
        }

        if self.sandbox_command.trim().is_empty() {
            return Err(AppError::Config("sandbox_command must not be empty".into()));
        }

        if self.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.shutdown_grace_seconds == 0 {
            return Err(AppError::Config(
                "shutdown_grace_seconds must be greater than zero".into(),
            ));
        }

        self.translation_rules().map(|_| ())
    }
}
