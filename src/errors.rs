//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::io;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all proxy failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A caller-supplied argument (agent name, workspace path) is invalid.
    InvalidArgument(String),
    /// The operation is not valid in the current state (e.g. session disposed).
    InvalidOperation(String),
    /// ACP framing or JSON-RPC protocol failure.
    Acp(String),
    /// The agent process could not be started.
    Spawn(String),
    /// File-system, pipe, or other I/O failure.
    Io(String),
    /// The OS refused access to a file or executable.
    Unauthorized(String),
    /// The requested operation is not supported on this platform.
    NotSupported(String),
    /// The operation was abandoned because cancellation was requested.
    Cancelled,
}

impl AppError {
    /// Whether this error represents cooperative cancellation rather than a fault.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::Unauthorized(err.to_string()),
            io::ErrorKind::Unsupported => Self::NotSupported(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Acp(format!("json: {err}"))
    }
}
