use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{runtime::Handle, time::sleep};
use tracing::{info, warn};

use crate::{
    agent::{
        config::AgentConfig, error::AgentError, host::BrowserHost, session::DebugSessionManager,
        stores::ConsoleEntry,
    },
    domain::models::TabId,
};

pub const DEFAULT_EXTENSION_PAGE: &str = "_generated_background_page.html";

/// Reads the global error markers extensions commonly leave behind and
/// returns them as strings.
pub const ERROR_MARKER_PROBE: &str = r"(() => {
  const out = [];
  for (const key of ['__lastError', '__extensionErrors', '__errors']) {
    const value = globalThis[key];
    if (value == null) continue;
    const items = Array.isArray(value) ? value : [value];
    for (const item of items) out.push(String(item && item.message ? item.message : item));
  }
  if (globalThis.chrome && chrome.runtime && chrome.runtime.lastError) {
    out.push(String(chrome.runtime.lastError.message));
  }
  return out;
})()";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub extension_id: String,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub probe: bool,
    #[serde(default = "default_true")]
    pub close_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReport {
    pub extension_id: String,
    pub tab_id: TabId,
    pub window_ms: u64,
    pub captured: Vec<ConsoleEntry>,
    pub errors_in_window: usize,
    pub probe_markers: Vec<String>,
    pub total_errors: usize,
    pub total_console: usize,
    pub page_closed: bool,
}

/// Page opened for one capture. Dropping it while armed closes the page in
/// the background, which covers a capture future cancelled mid-window.
struct CapturePage {
    host: Arc<dyn BrowserHost>,
    sessions: Arc<DebugSessionManager>,
    tab_id: TabId,
    armed: bool,
}

impl CapturePage {
    /// Closes the page now and reports whether the browser accepted it.
    async fn close(mut self) -> bool {
        let closed = match self.host.close_tab(self.tab_id).await {
            Ok(()) => true,
            Err(error) => {
                warn!("failed to close capture page tab={}: {error}", self.tab_id);
                false
            }
        };
        self.armed = false;
        self.sessions.on_tab_closed(self.tab_id);
        closed
    }
}

impl Drop for CapturePage {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let tab_id = self.tab_id;
        self.sessions.on_tab_closed(tab_id);
        match Handle::try_current() {
            Ok(runtime) => {
                let host = Arc::clone(&self.host);
                runtime.spawn(async move {
                    if let Err(error) = host.close_tab(tab_id).await {
                        warn!("failed to close abandoned capture page tab={tab_id}: {error}");
                    }
                });
            }
            Err(_) => warn!("no runtime to close abandoned capture page tab={tab_id}"),
        }
    }
}

/// Opens an extension page, observes it for one window and returns what it
/// logged. The capture listener and the opened page are released on every
/// exit path, including cancellation of the returned future.
pub async fn capture_extension_errors(
    host: &Arc<dyn BrowserHost>,
    sessions: &Arc<DebugSessionManager>,
    config: &AgentConfig,
    request: CaptureRequest,
) -> Result<CaptureReport, AgentError> {
    if request.extension_id.trim().is_empty() {
        return Err(AgentError::InvalidParams("extensionId is required".to_owned()));
    }

    let page = request.page.as_deref().unwrap_or(DEFAULT_EXTENSION_PAGE);
    let tab_id = host.open_extension_page(&request.extension_id, page).await?;
    let opened = CapturePage {
        host: Arc::clone(host),
        sessions: Arc::clone(sessions),
        tab_id,
        armed: request.close_page,
    };
    info!(
        "capturing extension errors extension={} tab={tab_id}",
        request.extension_id
    );

    let observed = observe(sessions, config, &request, tab_id).await;

    let page_closed = if request.close_page {
        opened.close().await
    } else {
        false
    };

    let mut report = observed?;
    report.page_closed = page_closed;
    Ok(report)
}

async fn observe(
    sessions: &Arc<DebugSessionManager>,
    config: &AgentConfig,
    request: &CaptureRequest,
    tab_id: TabId,
) -> Result<CaptureReport, AgentError> {
    sleep(config.page_settle()).await;
    sessions.attach(tab_id).await?;

    // Installed before the enables: Runtime.enable replays messages logged so far.
    let listener = sessions.begin_capture(&request.extension_id, tab_id);
    for enable in ["Runtime.enable", "Log.enable"] {
        sessions.send_command(tab_id, enable, json!({})).await?;
    }

    let window = config.capture_window_for(request.wait_ms);
    sleep(window).await;

    let mut probe_markers = Vec::new();
    if request.probe {
        match sessions.evaluate(tab_id, ERROR_MARKER_PROBE, false).await {
            Ok(Value::Array(items)) => {
                probe_markers = items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect();
            }
            Ok(_) => {}
            Err(error) => warn!("error marker probe failed tab={tab_id}: {error}"),
        }
        listener.record(
            probe_markers
                .iter()
                .cloned()
                .map(ConsoleEntry::from_marker)
                .collect(),
        );
    }

    let captured = listener.finish();
    let totals = sessions.extension_errors(&request.extension_id);

    Ok(CaptureReport {
        extension_id: request.extension_id.clone(),
        tab_id,
        window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        errors_in_window: captured.iter().filter(|entry| entry.is_error()).count(),
        captured,
        probe_markers,
        total_errors: totals.errors.len(),
        total_console: totals.console.len(),
        page_closed: false,
    })
}
