use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::models::TabId;

/// Failures inside the browser agent. None of them cross the relay boundary
/// as faults; the dispatcher renders each one as an `{"error": ...}` result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Automation permission is disabled")]
    PermissionDenied,
    #[error("No target tab")]
    NoTarget,
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("failed to attach debugger to tab {tab_id}: {message}")]
    Attach { tab_id: TabId, message: String },
    #[error("{method} failed: {message}")]
    Command { method: String, message: String },
    #[error("Content script unreachable in tab {0}")]
    ContentScriptUnreachable(TabId),
    #[error("{0}")]
    Host(String),
}

impl AgentError {
    #[must_use]
    pub fn to_result(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}
