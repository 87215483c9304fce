//! Registry of JSON-RPC fields that carry filesystem paths.
//!
//! A rule names a direction, a method, a field path inside the message, and
//! how the value at that path is rewritten. The registry ships with the ACP
//! fields known to carry paths and can be extended from configuration with
//! `[[translation]]` entries:
//!
//! ```toml
//! [[translation]]
//! direction = "inbound"
//! method = "x/open_file"
//! field = "params.files[].path"
//! kind = "path"
//! ```
//!
//! Field paths are dot-separated object keys; a `[]` suffix visits every
//! element of an array. Missing fields and values of the wrong kind are left
//! alone.
//!
//! Inbound rules also cover the agent's replies to editor requests: a reply
//! is matched by the method of the request it answers, so a rule such as
//! `method = "x/stat"`, `field = "result.path"` rewrites that reply.

use std::fmt::{Display, Formatter};

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;
use url::Url;

use super::PathTranslator;
use crate::{AppError, Result};

/// Which way a message is travelling through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Editor → agent; host paths become container paths.
    Outbound,
    /// Agent → editor; container paths become host paths.
    Inbound,
}

/// How the value at a rule's field path is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A single path string.
    Path,
    /// An array of path strings.
    PathList,
    /// A `file://` URI whose path component is translated.
    FileUri,
    /// A tool-server configuration tree (map or array of servers).
    ToolServers,
}

/// Rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuleSpec {
    /// Direction the rule applies to.
    pub direction: Direction,
    /// JSON-RPC method name, e.g. `session/new`.
    pub method: String,
    /// Field path, e.g. `params.cwd` or `params.update.locations[].path`.
    pub field: String,
    /// Rewrite strategy for the addressed value.
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Each,
}

/// Parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a dot-separated field path.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidArgument`] for an empty path or an empty
    /// segment (`params..cwd`).
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(AppError::InvalidArgument("field path must not be empty".into()));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (key, each) = match part.strip_suffix("[]") {
                Some(key) => (key, true),
                None => (part, false),
            };
            if key.is_empty() && !each {
                return Err(AppError::InvalidArgument(format!(
                    "field path has an empty segment: {raw}"
                )));
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_owned()));
            }
            if each {
                segments.push(Segment::Each);
            }
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A single translation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRule {
    direction: Direction,
    method: String,
    field: FieldPath,
    kind: FieldKind,
}

impl TranslationRule {
    /// Build a rule from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidArgument`] if the method is empty or the
    /// field path does not parse.
    pub fn new(direction: Direction, method: &str, field: &str, kind: FieldKind) -> Result<Self> {
        if method.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "translation rule method must not be empty".into(),
            ));
        }
        Ok(Self {
            direction,
            method: method.to_owned(),
            field: FieldPath::parse(field)?,
            kind,
        })
    }

    /// Direction this rule applies to.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Method this rule applies to.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Field path addressed by this rule.
    #[must_use]
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    /// Rewrite strategy.
    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

impl TryFrom<&RuleSpec> for TranslationRule {
    type Error = AppError;

    fn try_from(spec: &RuleSpec) -> Result<Self> {
        Self::new(spec.direction, &spec.method, &spec.field, spec.kind)
    }
}

/// Default rules: `(direction, method, field, kind)`.
const ACP_DEFAULT_RULES: &[(Direction, &str, &str, FieldKind)] = &[
    (Direction::Outbound, "session/new", "params.cwd", FieldKind::Path),
    (Direction::Outbound, "session/new", "params.mcpServers", FieldKind::ToolServers),
    (Direction::Outbound, "session/load", "params.cwd", FieldKind::Path),
    (Direction::Outbound, "session/load", "params.mcpServers", FieldKind::ToolServers),
    (Direction::Outbound, "session/prompt", "params.prompt[].uri", FieldKind::FileUri),
    (Direction::Outbound, "session/prompt", "params.prompt[].resource.uri", FieldKind::FileUri),
    (Direction::Inbound, "fs/read_text_file", "params.path", FieldKind::Path),
    (Direction::Inbound, "fs/write_text_file", "params.path", FieldKind::Path),
    (Direction::Inbound, "terminal/create", "params.cwd", FieldKind::Path),
    (Direction::Inbound, "session/update", "params.update.locations[].path", FieldKind::Path),
    (Direction::Inbound, "session/update", "params.update.content[].path", FieldKind::Path),
];

/// Ordered collection of [`TranslationRule`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationRules {
    rules: Vec<TranslationRule>,
}

impl TranslationRules {
    /// Registry with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry preloaded with the ACP fields known to carry paths.
    #[must_use]
    pub fn acp_defaults() -> Self {
        let rules = ACP_DEFAULT_RULES
            .iter()
            .map(|&(direction, method, field, kind)| TranslationRule {
                direction,
                method: method.to_owned(),
                field: FieldPath {
                    raw: field.to_owned(),
                    segments: parse_static(field),
                },
                kind,
            })
            .collect();
        Self { rules }
    }

    /// Append a rule.
    pub fn push(&mut self, rule: TranslationRule) {
        self.rules.push(rule);
    }

    /// Append rules parsed from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails to parse; no rules are added in that case.
    pub fn extend_from_specs(&mut self, specs: &[RuleSpec]) -> Result<()> {
        let parsed = specs
            .iter()
            .map(TranslationRule::try_from)
            .collect::<Result<Vec<_>>>()?;
        self.rules.extend(parsed);
        Ok(())
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the registry has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate over the rules.
    pub fn iter(&self) -> impl Iterator<Item = &TranslationRule> {
        self.rules.iter()
    }

    /// Rewrite every registered field of `message` for `direction`, keyed by
    /// the message's own `method`.
    ///
    /// Messages without a `method` are left untouched; see
    /// [`TranslationRules::apply_for_method`] for replies. Returns the number
    /// of rules whose method matched.
    pub fn apply(&self, direction: Direction, message: &mut Value, translator: &PathTranslator) -> usize {
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_owned) else {
            return 0;
        };
        self.apply_for_method(direction, &method, message, translator)
    }

    /// Rewrite every registered field of `message` for `direction` and
    /// `method`, whatever the message's own envelope says.
    ///
    /// Used for replies, which carry no `method` of their own.
    pub fn apply_for_method(
        &self,
        direction: Direction,
        method: &str,
        message: &mut Value,
        translator: &PathTranslator,
    ) -> usize {
        let mut matched = 0;
        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.direction == direction && rule.method == method)
        {
            matched += 1;
            visit_mut(message, &rule.field.segments, &mut |value| {
                rewrite_value(rule.kind, direction, value, translator);
            });
            trace!(method, field = %rule.field, "translation rule applied");
        }
        matched
    }
}

fn parse_static(field: &str) -> Vec<Segment> {
    FieldPath::parse(field)
        .map(|path| path.segments)
        .unwrap_or_default()
}

fn visit_mut(value: &mut Value, segments: &[Segment], f: &mut dyn FnMut(&mut Value)) {
    match segments.split_first() {
        None => f(value),
        Some((Segment::Key(key), rest)) => {
            if let Some(child) = value.as_object_mut().and_then(|map| map.get_mut(key)) {
                visit_mut(child, rest, f);
            }
        }
        Some((Segment::Each, rest)) => {
            if let Value::Array(items) = value {
                for item in items {
                    visit_mut(item, rest, f);
                }
            }
        }
    }
}

fn rewrite_value(kind: FieldKind, direction: Direction, value: &mut Value, translator: &PathTranslator) {
    let translate = |path: &str| match direction {
        Direction::Outbound => translator.to_container(path),
        Direction::Inbound => translator.to_host(path),
    };

    match kind {
        FieldKind::Path => {
            if let Value::String(path) = value {
                *path = translate(path);
            }
        }
        FieldKind::PathList => {
            if let Value::Array(items) = value {
                for item in items {
                    if let Value::String(path) = item {
                        *path = translate(path);
                    }
                }
            }
        }
        FieldKind::FileUri => {
            if let Value::String(uri) = value {
                if let Some(translated) = translate_file_uri(uri, &translate) {
                    *uri = translated;
                }
            }
        }
        FieldKind::ToolServers => {
            *value = match direction {
                Direction::Outbound => translator.translate_tool_server_config(value),
                Direction::Inbound => translator.restore_tool_server_config(value),
            };
        }
    }
}

/// Percent-decode the path of a `file://` URI, translate it, and re-encode.
///
/// Returns `None` (leave as is) for other schemes, URIs with a remote host,
/// non-UTF-8 paths, and paths the translator does not change. Query and
/// fragment are kept.
fn translate_file_uri(uri: &str, translate: impl Fn(&str) -> String) -> Option<String> {
    let parsed = Url::parse(uri).ok().filter(|url| url.scheme() == "file")?;
    let path = parsed.to_file_path().ok()?;
    let path = path.to_str()?;

    let translated = translate(path);
    if translated == path {
        return None;
    }

    let mut rewritten = Url::from_file_path(&translated).ok()?;
    rewritten.set_query(parsed.query());
    rewritten.set_fragment(parsed.fragment());
    Some(rewritten.into())
}
