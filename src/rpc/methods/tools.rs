use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    application::state::SharedState,
    protocol::{CallToolResult, ErrorShape},
    rpc::methods::{parse_optional_params, parse_required_params},
};

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    schema: fn() -> Value,
}

fn no_params() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn tab_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tabId": { "type": "integer", "description": "Target tab; defaults to the active tab" }
        }
    })
}

fn cdp_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tabId": { "type": "integer" },
            "method": { "type": "string", "description": "Debugging protocol method, e.g. DOM.getDocument" },
            "params": { "type": "object" }
        },
        "required": ["method"]
    })
}

fn evaluate_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tabId": { "type": "integer" },
            "expression": { "type": "string" },
            "awaitPromise": { "type": "boolean" }
        },
        "required": ["expression"]
    })
}

fn log_query_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tabId": { "type": "integer" },
            "limit": { "type": "integer", "minimum": 1 }
        }
    })
}

fn extension_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "extensionId": { "type": "string" }
        },
        "required": ["extensionId"]
    })
}

fn capture_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "extensionId": { "type": "string" },
            "page": { "type": "string", "description": "Extension page to open, default background page" },
            "waitMs": { "type": "integer", "minimum": 0 },
            "probe": { "type": "boolean" },
            "closePage": { "type": "boolean" }
        },
        "required": ["extensionId"]
    })
}

const TOOL_CATALOG: &[ToolSpec] = &[
    ToolSpec {
        name: "get_status",
        description: "Report the browser agent's attached sessions and settings",
        schema: no_params,
    },
    ToolSpec {
        name: "list_tabs",
        description: "List open browser tabs",
        schema: no_params,
    },
    ToolSpec {
        name: "debugger_attach",
        description: "Attach a debugging session to a tab",
        schema: tab_params,
    },
    ToolSpec {
        name: "debugger_detach",
        description: "Detach the debugging session from a tab",
        schema: tab_params,
    },
    ToolSpec {
        name: "cdp_command",
        description: "Send a raw debugging protocol command to a tab, attaching first if needed",
        schema: cdp_params,
    },
    ToolSpec {
        name: "evaluate",
        description: "Evaluate a JavaScript expression in a tab and return its value",
        schema: evaluate_params,
    },
    ToolSpec {
        name: "get_console_logs",
        description: "Console messages and exceptions captured for a tab",
        schema: log_query_params,
    },
    ToolSpec {
        name: "get_network_log",
        description: "Network requests captured for a tab",
        schema: log_query_params,
    },
    ToolSpec {
        name: "get_animations",
        description: "Animations started in a tab",
        schema: log_query_params,
    },
    ToolSpec {
        name: "get_dom_mutations",
        description: "Throttled DOM mutation reports for a tab",
        schema: log_query_params,
    },
    ToolSpec {
        name: "clear_tab_logs",
        description: "Empty every capture buffer of a tab",
        schema: tab_params,
    },
    ToolSpec {
        name: "capture_extension_errors",
        description: "Open an extension page, observe it for a window and collect its errors",
        schema: capture_params,
    },
    ToolSpec {
        name: "get_extension_errors",
        description: "Errors and console output collected for an extension",
        schema: extension_params,
    },
    ToolSpec {
        name: "clear_extension_errors",
        description: "Empty the collected errors of an extension",
        schema: extension_params,
    },
    ToolSpec {
        name: "snapshot_extension_state",
        description: "Record the current state of an extension as diff markers",
        schema: extension_params,
    },
    ToolSpec {
        name: "diff_extension_state",
        description: "Compare an extension's current state with its last snapshot",
        schema: extension_params,
    },
];

/// Names of every tool advertised by `tools/list`.
pub fn tool_names() -> impl Iterator<Item = &'static str> {
    TOOL_CATALOG.iter().map(|tool| tool.name)
}

pub fn handle_list(params: Option<&Value>) -> Result<Value, ErrorShape> {
    let _: Map<String, Value> = parse_optional_params("tools/list", params)?;

    let tools = TOOL_CATALOG
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": (tool.schema)(),
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({ "tools": tools }))
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Forwards any named tool to the browser agent. Tools outside the catalog are
/// still relayed; the agent hands them to the page's content script.
pub async fn handle_call(state: &SharedState, params: Option<&Value>) -> Result<Value, ErrorShape> {
    let params: CallParams = parse_required_params("tools/call", params)?;
    let arguments = match params.arguments {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(arguments) => arguments,
    };

    let outcome = state.relay().submit(&params.name, arguments).await;
    Ok(serde_json::to_value(CallToolResult::from_tool_value(&outcome)).unwrap_or(outcome))
}
