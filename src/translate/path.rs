//! Host ⇄ container workspace path mapping.
//!
//! The host workspace root is normalized once at construction: `.` and `..`
//! segments are resolved lexically and trailing separators are dropped.
//! Translation is purely lexical. Nothing touches the file system, so a path
//! that does not exist yet (a file the agent is about to create) maps the
//! same way as one that does.
//!
//! Every operation is conservative: input that is relative, cannot be
//! normalized, or lies outside the mapped workspace comes back unchanged.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR};

use crate::{AppError, Result};

/// Workspace root inside the agent container unless configured otherwise.
pub const DEFAULT_CONTAINER_WORKSPACE: &str = "/home/agent/workspace";

/// Longest path (in bytes) the translator will attempt to normalize.
///
/// Longer inputs are treated as un-normalizable and passed through.
pub const MAX_PATH_BYTES: usize = 4096;

/// Bidirectional mapping between a host workspace root and the container
/// workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    /// Host root exactly as supplied by the caller.
    host_workspace_root: PathBuf,
    /// Absolute, normalized host root used for prefix matching.
    normalized_host_root: PathBuf,
    /// Normalized POSIX container root (no trailing `/` unless it is `/`).
    container_workspace_root: String,
}

impl PathTranslator {
    /// Build a translator for `host_workspace_root` ↔ `container_workspace_root`.
    ///
    /// A relative host root is resolved against the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidArgument`] if the host root is empty or
    /// cannot be normalized, or if the container root is not an absolute
    /// POSIX path.
    pub fn new(
        host_workspace_root: impl Into<PathBuf>,
        container_workspace_root: impl AsRef<str>,
    ) -> Result<Self> {
        let host_workspace_root = host_workspace_root.into();
        if host_workspace_root.as_os_str().is_empty() {
            return Err(AppError::InvalidArgument(
                "workspace path must not be empty".into(),
            ));
        }

        let absolute = if host_workspace_root.has_root() {
            host_workspace_root.clone()
        } else {
            std::env::current_dir()?.join(&host_workspace_root)
        };

        let normalized_host_root = normalize_host_path(&absolute).ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "workspace path cannot be normalized: {}",
                host_workspace_root.display()
            ))
        })?;

        let container_raw = container_workspace_root.as_ref();
        if !container_raw.starts_with('/') {
            return Err(AppError::InvalidArgument(format!(
                "container workspace root must be an absolute path: {container_raw}"
            )));
        }
        let container_workspace_root = normalize_container_path(container_raw).ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "container workspace root cannot be normalized: {container_raw}"
            ))
        })?;

        Ok(Self {
            host_workspace_root,
            normalized_host_root,
            container_workspace_root,
        })
    }

    /// Build a translator that maps onto [`DEFAULT_CONTAINER_WORKSPACE`].
    ///
    /// # Errors
    ///
    /// Same as [`PathTranslator::new`].
    pub fn with_default_container_root(host_workspace_root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(host_workspace_root, DEFAULT_CONTAINER_WORKSPACE)
    }

    /// Host root as originally supplied.
    #[must_use]
    pub fn host_workspace_root(&self) -> &Path {
        &self.host_workspace_root
    }

    /// Absolute, normalized host root.
    #[must_use]
    pub fn normalized_host_root(&self) -> &Path {
        &self.normalized_host_root
    }

    /// Normalized container root.
    #[must_use]
    pub fn container_workspace_root(&self) -> &str {
        &self.container_workspace_root
    }

    /// Map a host path into the container.
    ///
    /// Relative input, input that fails normalization, and paths outside the
    /// host workspace are returned unchanged.
    #[must_use]
    pub fn to_container(&self, host_path: &str) -> String {
        if !Path::new(host_path).has_root() {
            return host_path.to_owned();
        }

        let Some(normalized) = normalize_host_path(Path::new(host_path)) else {
            return host_path.to_owned();
        };

        let Ok(rest) = normalized.strip_prefix(&self.normalized_host_root) else {
            return host_path.to_owned();
        };

        if rest.as_os_str().is_empty() {
            return self.container_workspace_root.clone();
        }

        let mut segments = Vec::new();
        for component in rest.components() {
            match component.as_os_str().to_str() {
                Some(segment) => segments.push(segment),
                None => return host_path.to_owned(),
            }
        }

        join_posix(&self.container_workspace_root, &segments.join("/"))
    }

    /// Map a container path back onto the host.
    ///
    /// Input not rooted at `/`, and paths outside the container workspace, are
    /// returned unchanged.
    #[must_use]
    pub fn to_host(&self, container_path: &str) -> String {
        if !container_path.starts_with('/') {
            return container_path.to_owned();
        }

        let Some(normalized) = normalize_container_path(container_path) else {
            return container_path.to_owned();
        };

        let Some(rest) = strip_posix_prefix(&normalized, &self.container_workspace_root) else {
            return container_path.to_owned();
        };

        let mut host = self.normalized_host_root.clone();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            host.push(segment);
        }

        match host.to_str() {
            Some(host) => host.to_owned(),
            None => container_path.to_owned(),
        }
    }
}

/// Lexically normalize a rooted host path.
///
/// Returns `None` for relative input, embedded NUL bytes, or results longer
/// than [`MAX_PATH_BYTES`].
fn normalize_host_path(path: &Path) -> Option<PathBuf> {
    if !path.has_root() || path.as_os_str().as_encoded_bytes().contains(&0) {
        return None;
    }

    let mut prefix = None;
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = Some(p.as_os_str()),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root.
                parts.pop();
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    let mut normalized = PathBuf::new();
    if let Some(prefix) = prefix {
        normalized.push(prefix);
    }
    normalized.push(MAIN_SEPARATOR_STR);
    for part in parts {
        normalized.push(part);
    }

    (normalized.as_os_str().len() <= MAX_PATH_BYTES).then_some(normalized)
}

/// Lexically normalize a `/`-rooted container path.
fn normalize_container_path(path: &str) -> Option<String> {
    if !path.starts_with('/') || path.contains('\0') || path.len() > MAX_PATH_BYTES {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    Some(format!("/{}", parts.join("/")))
}

/// Remainder of `path` below `root`, or `None` when `path` is not `root` or
/// a descendant of it. Both arguments must already be normalized.
fn strip_posix_prefix<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if root == "/" {
        return Some(path.trim_start_matches('/'));
    }
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn join_posix(root: &str, rest: &str) -> String {
    if root.ends_with('/') {
        format!("{root}{rest}")
    } else {
        format!("{root}/{rest}")
    }
}
