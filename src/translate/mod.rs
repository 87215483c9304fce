//! Host ⇄ container translation of paths carried in ACP messages.
//!
//! - `path`: [`PathTranslator`], the lexical root-to-root mapping.
//! - `tool_servers`: rewriting of embedded tool-server (MCP) configuration.
//! - `rules`: the registry of method fields that carry paths.

pub mod path;
pub mod rules;
pub mod tool_servers;

pub use path::{PathTranslator, DEFAULT_CONTAINER_WORKSPACE};
pub use rules::{Direction, FieldKind, FieldPath, RuleSpec, TranslationRule, TranslationRules};
