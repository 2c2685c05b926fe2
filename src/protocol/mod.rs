mod errors;
mod frames;
mod peer;

pub use errors::{
    ERROR_INVALID_PARAMS, ERROR_INVALID_REQUEST, ERROR_METHOD_NOT_FOUND, ERROR_PARSE, ErrorShape,
};
pub use frames::{
    CallToolResult, InitializeResult, JSONRPC_VERSION, RpcNotification, RpcRequest, RpcResponse,
    ServerCapabilities, ServerInfo, ToolContent, ToolsCapability,
};
pub use peer::{PeerMessage, decode_peer_message, encode_peer_message};

use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub fn parse_request_line(text: &str) -> Result<RpcRequest, ErrorShape> {
    let request = serde_json::from_str::<RpcRequest>(text)
        .map_err(|error| ErrorShape::new(ERROR_PARSE, format!("invalid request line: {error}")))?;

    if request
        .jsonrpc
        .as_deref()
        .is_some_and(|version| version != JSONRPC_VERSION)
    {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            "invalid request line: unsupported jsonrpc version",
        ));
    }
    if request.method.trim().is_empty() {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            "invalid request line: missing method",
        ));
    }

    Ok(request)
}

/// Best-effort recovery of the request id from a line that failed to parse.
#[must_use]
pub fn extract_request_id(text: &str) -> Option<Value> {
    let value = serde_json::from_str::<Value>(text).ok()?;
    match value.get("id")? {
        Value::Null => None,
        id @ (Value::Number(_) | Value::String(_)) => Some(id.clone()),
        _ => None,
    }
}

#[must_use]
pub fn response_ok(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: JSONRPC_VERSION,
        id,
        result: Some(result),
        error: None,
    }
}

#[must_use]
pub fn response_error(id: Value, error: ErrorShape) -> RpcResponse {
    RpcResponse {
        jsonrpc: JSONRPC_VERSION,
        id,
        result: None,
        error: Some(error),
    }
}

#[must_use]
pub fn notification(method: impl Into<String>, params: Option<Value>) -> RpcNotification {
    RpcNotification {
        jsonrpc: JSONRPC_VERSION,
        method: method.into(),
        params,
    }
}
