//! Tool-server (MCP) configuration rewriting.
//!
//! Two shapes are accepted:
//!
//! ```json
//! { "fs": { "command": "node", "args": ["--root", "/host/ws"] } }
//! [ { "name": "fs", "command": "node", "args": ["--root", "/host/ws"] } ]
//! ```
//!
//! Only string elements of each server's `args` array are rewritten. Every
//! other key, value kind, and the key/element order are carried over as-is.

use serde_json::{Map, Value};

use super::PathTranslator;

impl PathTranslator {
    /// Rewrite host paths in a tool-server configuration to container paths.
    ///
    /// Unknown top-level shapes are returned as an unchanged deep copy.
    #[must_use]
    pub fn translate_tool_server_config(&self, tree: &Value) -> Value {
        map_tool_server_args(tree, &|arg| self.to_container(arg))
    }

    /// Inverse of [`PathTranslator::translate_tool_server_config`]: rewrite
    /// container paths in `args` back to host paths.
    #[must_use]
    pub fn restore_tool_server_config(&self, tree: &Value) -> Value {
        map_tool_server_args(tree, &|arg| self.to_host(arg))
    }
}

fn map_tool_server_args(tree: &Value, map_arg: &dyn Fn(&str) -> String) -> Value {
    match tree {
        Value::Object(servers) => Value::Object(
            servers
                .iter()
                .map(|(name, definition)| (name.clone(), map_definition(definition, map_arg)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(servers) => Value::Array(
            servers
                .iter()
                .map(|definition| map_definition(definition, map_arg))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn map_definition(definition: &Value, map_arg: &dyn Fn(&str) -> String) -> Value {
    let Value::Object(fields) = definition else {
        return definition.clone();
    };

    let mut fields = fields.clone();
    if let Some(Value::Array(args)) = fields.get_mut("args") {
        for arg in args.iter_mut() {
            if let Value::String(text) = arg {
                *text = map_arg(text);
            }
        }
    }
    Value::Object(fields)
}
