use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::CorrelationId;

use super::{ERROR_PARSE, ErrorShape};

/// Messages exchanged over the peer channel between the relay and the browser agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    Register {
        client: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Registered,
    Ping,
    Pong,
    ToolCall {
        id: CorrelationId,
        tool: String,
        #[serde(default)]
        params: Value,
    },
    ToolResult {
        id: CorrelationId,
        #[serde(default)]
        result: Value,
    },
    Error {
        message: String,
    },
}

impl PeerMessage {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Registered => "registered",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
        }
    }
}

pub fn encode_peer_message(message: &PeerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub fn decode_peer_message(text: &str) -> Result<PeerMessage, ErrorShape> {
    serde_json::from_str::<PeerMessage>(text)
        .map_err(|error| ErrorShape::new(ERROR_PARSE, format!("invalid peer message: {error}")))
}
