use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("transport parse error: {0}")]
    TransportParse(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Timeout")]
    Timeout,
    #[error("Connection closed")]
    PeerDisconnected,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl RelayError {
    /// Renders the error as an ordinary tool result carrying an `error` field.
    #[must_use]
    pub fn into_tool_result(self) -> Value {
        json!({ "error": self.to_string() })
    }
}
