use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::{
    agent::{
        capture::{CaptureRequest, capture_extension_errors},
        config::AgentConfig,
        error::AgentError,
        host::BrowserHost,
        markers::SnapshotMarkers,
        policy,
        session::DebugSessionManager,
        stores::LogPage,
    },
    domain::models::TabId,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LogQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdpCommandParams {
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams {
    expression: String,
    #[serde(default)]
    await_promise: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionParams {
    extension_id: String,
}

/// Executes relayed tool calls against the browser. Callers serialize calls;
/// the dispatcher itself holds no per-call state.
pub struct ToolDispatcher {
    host: Arc<dyn BrowserHost>,
    sessions: Arc<DebugSessionManager>,
    config: AgentConfig,
    automation_enabled: AtomicBool,
    markers: Mutex<SnapshotMarkers>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(
        host: Arc<dyn BrowserHost>,
        sessions: Arc<DebugSessionManager>,
        config: AgentConfig,
    ) -> Self {
        Self {
            host,
            sessions,
            automation_enabled: AtomicBool::new(config.automation_enabled),
            config,
            markers: Mutex::new(SnapshotMarkers::default()),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<DebugSessionManager> {
        &self.sessions
    }

    #[must_use]
    pub fn automation_enabled(&self) -> bool {
        self.automation_enabled.load(Ordering::SeqCst)
    }

    pub fn set_automation_enabled(&self, enabled: bool) {
        self.automation_enabled.store(enabled, Ordering::SeqCst);
        info!("automation permission {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Never fails: every error becomes an `{"error": message}` result.
    pub async fn execute(&self, tool: &str, params: Value) -> Value {
        match self.run(tool, params).await {
            Ok(result) => result,
            Err(error) => {
                debug!("tool {tool} failed: {error}");
                error.to_result()
            }
        }
    }

    async fn run(&self, tool: &str, params: Value) -> Result<Value, AgentError> {
        if policy::requires_privilege(tool) && !self.automation_enabled() {
            return Err(AgentError::PermissionDenied);
        }
        let tab_id = if policy::requires_target(tool) {
            Some(self.resolve_target(&params).await?)
        } else {
            None
        };

        match (tool, tab_id) {
            ("get_status", _) => Ok(self.status().await),
            ("list_tabs", _) => Ok(json!({ "tabs": self.host.list_tabs().await? })),
            ("capture_extension_errors", _) => {
                let request: CaptureRequest = parse_params(tool, params)?;
                let report =
                    capture_extension_errors(&self.host, &self.sessions, &self.config, request)
                        .await?;
                Ok(json!(report))
            }
            ("get_extension_errors", _) => {
                let ExtensionParams { extension_id } = parse_params(tool, params)?;
                Ok(json!(self.sessions.extension_errors(&extension_id)))
            }
            ("clear_extension_errors", _) => {
                let ExtensionParams { extension_id } = parse_params(tool, params)?;
                let cleared = self.sessions.clear_extension(&extension_id);
                Ok(json!({ "success": true, "cleared": cleared }))
            }
            ("snapshot_extension_state", _) => {
                let ExtensionParams { extension_id } = parse_params(tool, params)?;
                let values = self.host.extension_state(&extension_id).await?;
                let keys = self
                    .markers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&extension_id, values);
                Ok(json!({ "success": true, "extensionId": extension_id, "keys": keys }))
            }
            ("diff_extension_state", _) => {
                let ExtensionParams { extension_id } = parse_params(tool, params)?;
                let current = self.host.extension_state(&extension_id).await?;
                let diff = self
                    .markers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .diff(&extension_id, &current);
                diff.map(|diff| {
                    let unchanged = diff.is_empty();
                    let mut value = json!(diff);
                    value["unchanged"] = json!(unchanged);
                    value
                })
                .ok_or_else(|| {
                    AgentError::InvalidParams(format!(
                        "no snapshot recorded for extension {extension_id}"
                    ))
                })
            }
            (_, None) => Err(AgentError::NoTarget),
            ("debugger_attach", Some(tab_id)) => {
                let outcome = self.sessions.attach(tab_id).await?;
                Ok(json!({
                    "success": outcome.success,
                    "already": outcome.already,
                    "tabId": tab_id,
                }))
            }
            ("debugger_detach", Some(tab_id)) => {
                let detached = self.sessions.detach(tab_id).await?;
                Ok(json!({ "success": true, "detached": detached, "tabId": tab_id }))
            }
            ("cdp_command", Some(tab_id)) => {
                let CdpCommandParams { method, params } = parse_params(tool, params)?;
                let result = self
                    .sessions
                    .send_command(tab_id, &method, params.unwrap_or_else(|| json!({})))
                    .await?;
                Ok(json!({ "result": result }))
            }
            ("evaluate", Some(tab_id)) => {
                let EvaluateParams {
                    expression,
                    await_promise,
                } = parse_params(tool, params)?;
                let value = self
                    .sessions
                    .evaluate(tab_id, &expression, await_promise)
                    .await?;
                Ok(json!({ "value": value }))
            }
            ("get_console_logs", Some(tab_id)) => {
                let query: LogQuery = parse_params(tool, params)?;
                Ok(log_page(tab_id, self.sessions.console_logs(tab_id, query.limit)))
            }
            ("get_network_log", Some(tab_id)) => {
                let query: LogQuery = parse_params(tool, params)?;
                Ok(log_page(tab_id, self.sessions.network_log(tab_id, query.limit)))
            }
            ("get_animations", Some(tab_id)) => {
                let query: LogQuery = parse_params(tool, params)?;
                Ok(log_page(tab_id, self.sessions.animations(tab_id, query.limit)))
            }
            ("get_dom_mutations", Some(tab_id)) => {
                let query: LogQuery = parse_params(tool, params)?;
                Ok(log_page(tab_id, self.sessions.dom_mutations(tab_id, query.limit)))
            }
            ("clear_tab_logs", Some(tab_id)) => {
                self.sessions.clear_tab(tab_id);
                Ok(json!({ "success": true, "tabId": tab_id }))
            }
            (_, Some(tab_id)) => self.host.send_to_content_script(tab_id, tool, params).await,
        }
    }

    /// `tabId` in the params wins over the active tab.
    async fn resolve_target(&self, params: &Value) -> Result<TabId, AgentError> {
        if let Some(tab_id) = params.get("tabId").and_then(Value::as_i64) {
            return Ok(tab_id);
        }
        self.host.active_tab().await.ok_or(AgentError::NoTarget)
    }

    async fn status(&self) -> Value {
        json!({
            "automationEnabled": self.automation_enabled(),
            "activeTab": self.host.active_tab().await,
            "sessions": self.sessions.sessions(),
            "client": self.config.client_name,
        })
    }
}

fn log_page<T: Serialize>(tab_id: TabId, page: LogPage<T>) -> Value {
    json!({
        "tabId": tab_id,
        "count": page.entries.len(),
        "evicted": page.evicted,
        "entries": page.entries,
    })
}

fn parse_params<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T, AgentError> {
    let raw = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(raw)
        .map_err(|error| AgentError::InvalidParams(format!("{tool}: {error}")))
}
