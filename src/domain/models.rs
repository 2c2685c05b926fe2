use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag matching a `tool_call` to its `tool_result`. Unique for the lifetime of the relay.
pub type CorrelationId = u64;

/// Browser tab identifier as reported by the host browser.
pub type TabId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerConnectionState {
    Unconnected,
    Connecting,
    Registered,
    Disconnecting,
}

impl PeerConnectionState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Disconnecting => "disconnecting",
        }
    }

    /// Calls may be queued while a peer is registering or registered.
    #[must_use]
    pub fn accepts_calls(self) -> bool {
        matches!(self, Self::Connecting | Self::Registered)
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerRole {
    /// The relay listens and the browser agent dials in.
    Server,
    /// Something already listens on the relay address; the relay dials out.
    Client,
}

impl PeerRole {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Supervisor-level view of a peer link, reported to operators. Unlike
/// `PeerConnectionState` it survives across reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LinkStatus {
    Idle,
    Listening,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect is disabled or its attempts are exhausted.
    Disconnected,
}

impl LinkStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            other => f.write_str(other.label()),
        }
    }
}
