// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Schema walker for `_mcp_data` fleet-directory injection (§4.4 point 1).
//!
//! Grounded on the teacher's schema-to-MCP bridge read in reverse: instead
//! of producing a JSON schema from a Rust type, this walks a declared JSON
//! schema looking for a property of the given name.
use serde_json::Value;

use crate::mcp::{PromptDescriptor, ToolDescriptor};

/// Returns `true` if `parameters` declares an object property named
/// `_mcp_data` at the top level (the only place the source ever places it).
pub fn declares_mcp_data(parameters: &Value) -> bool {
    parameters
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| props.contains_key("_mcp_data"))
        .unwrap_or(false)
}

/// Build the fleet directory injected into `_mcp_data`: every non-system
/// server's tools, keyed by server name. "System" servers (those in
/// `system_servers`) are excluded so a planner tool cannot recurse into
/// servers reserved for internal bookkeeping.
pub fn build_fleet_directory(
    tools_by_server: &std::collections::HashMap<String, Vec<ToolDescriptor>>,
    system_servers: &[String],
) -> Value {
    let mut directory = serde_json::Map::new();
    for (server, tools) in tools_by_server {
        if system_servers.iter().any(|s| s == server) {
            continue;
        }
        let entries: Vec<Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.tool_name,
                    "fully_qualified_name": t.fully_qualified_name(),
                    "description": t.description,
                })
            })
            .collect();
        directory.insert(server.clone(), Value::Array(entries));
    }
    Value::Object(directory)
}

/// Build a discovery directory of prompts for completeness, mirroring
/// `build_fleet_directory`'s shape for tools (used by introspection tools
/// that also want to see available prompts).
pub fn build_prompt_directory(
    prompts_by_server: &std::collections::HashMap<String, Vec<PromptDescriptor>>,
) -> Value {
    let mut directory = serde_json::Map::new();
    for (server, prompts) in prompts_by_server {
        let entries: Vec<Value> = prompts
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.prompt_name,
                    "description": p.description,
                })
            })
            .collect();
        directory.insert(server.clone(), Value::Array(entries));
    }
    Value::Object(directory)
}

/// Inject the fleet directory into `arguments._mcp_data` in place, if (and
/// only if) the tool's schema declared that field (§4.4 point 1). No-op if
/// `arguments` is not a JSON object.
pub fn inject_mcp_data(arguments: &mut Value, directory: Value) {
    if let Some(obj) = arguments.as_object_mut() {
        obj.insert("_mcp_data".to_string(), directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server_name: server.into(),
            tool_name: name.into(),
            description: format!("{name} tool"),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn declares_mcp_data_true_when_property_present() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "_mcp_data": {"type": "object"} }
        });
        assert!(declares_mcp_data(&schema));
    }

    #[test]
    fn declares_mcp_data_false_when_absent() {
        let schema = serde_json::json!({"type": "object", "properties": {"x": {"type": "string"}}});
        assert!(!declares_mcp_data(&schema));
    }

    #[test]
    fn declares_mcp_data_false_when_no_properties_key() {
        let schema = serde_json::json!({"type": "object"});
        assert!(!declares_mcp_data(&schema));
    }

    #[test]
    fn fleet_directory_excludes_system_servers() {
        let mut by_server = HashMap::new();
        by_server.insert("calc".to_string(), vec![tool("calc", "add")]);
        by_server.insert("sys".to_string(), vec![tool("sys", "introspect")]);
        let dir = build_fleet_directory(&by_server, &["sys".to_string()]);
        assert!(dir.get("calc").is_some());
        assert!(dir.get("sys").is_none());
    }

    #[test]
    fn inject_mcp_data_sets_field_on_object_arguments() {
        let mut args = serde_json::json!({"a": 1});
        inject_mcp_data(&mut args, serde_json::json!({"calc": []}));
        assert!(args.get("_mcp_data").is_some());
        assert_eq!(args["a"], 1);
    }

    #[test]
    fn inject_mcp_data_is_noop_on_non_object_arguments() {
        let mut args = serde_json::json!("not-an-object");
        inject_mcp_data(&mut args, serde_json::json!({}));
        assert_eq!(args, serde_json::json!("not-an-object"));
    }
}
