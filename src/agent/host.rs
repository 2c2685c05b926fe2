use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{agent::error::AgentError, domain::models::TabId};

/// Per-tab debugging protocol access (attach, detach, command).
#[async_trait]
pub trait DebuggerTransport: Send + Sync {
    async fn attach(&self, tab_id: TabId) -> Result<(), AgentError>;

    async fn detach(&self, tab_id: TabId) -> Result<(), AgentError>;

    async fn send_command(
        &self,
        tab_id: TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, AgentError>;
}

/// Browser facilities outside the debugging protocol.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn active_tab(&self) -> Option<TabId>;

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, AgentError>;

    /// Opens `page` of the extension in a background tab and returns its id.
    async fn open_extension_page(&self, extension_id: &str, page: &str)
    -> Result<TabId, AgentError>;

    async fn close_tab(&self, tab_id: TabId) -> Result<(), AgentError>;

    /// Current top-level state of an extension, as recorded by snapshot markers.
    async fn extension_state(&self, extension_id: &str) -> Result<Map<String, Value>, AgentError>;

    /// Request/response exchange with the content script of a tab. Fails with
    /// `ContentScriptUnreachable` when nothing answers.
    async fn send_to_content_script(
        &self,
        tab_id: TabId,
        tool: &str,
        params: Value,
    ) -> Result<Value, AgentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    pub title: String,
    pub active: bool,
}

/// One debugging protocol event tagged with its origin tab.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEvent {
    pub tab_id: TabId,
    pub method: String,
    pub params: Value,
}

/// Everything the host reports on the single global event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Debugger(DebugEvent),
    /// The session was detached by someone else (browser UI, devtools).
    Detached { tab_id: TabId, reason: String },
    TabClosed { tab_id: TabId },
}
