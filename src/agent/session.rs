use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    agent::{
        config::StoreLimits,
        error::AgentError,
        host::{DebugEvent, DebuggerTransport, HostEvent},
        stores::{
            AnimationEntry, ConsoleEntry, ExtensionErrorStore, LogPage, MutationEntry,
            NetworkEntry, TabStores, now_ms,
        },
        throttle::{MutationThrottle, ThrottleDecision},
    },
    domain::models::TabId,
};

/// Domains whose first command triggers an implicit `<Domain>.enable`.
pub const AUTO_ENABLE_DOMAINS: &[&str] = &[
    "Accessibility",
    "Animation",
    "CSS",
    "Console",
    "DOM",
    "Debugger",
    "Log",
    "Network",
    "Overlay",
    "Page",
    "Performance",
    "Profiler",
    "Runtime",
];

const MUTATION_EVENTS: &[&str] = &[
    "DOM.attributeModified",
    "DOM.attributeRemoved",
    "DOM.characterDataModified",
    "DOM.childNodeInserted",
    "DOM.childNodeRemoved",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Detached,
    Attaching,
    Attached,
}

#[derive(Debug, Clone)]
struct DebugSession {
    state: SessionState,
    enabled_domains: BTreeSet<String>,
    attached_at: Option<i64>,
}

impl DebugSession {
    fn new() -> Self {
        Self {
            state: SessionState::Detached,
            enabled_domains: BTreeSet::new(),
            attached_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttachOutcome {
    pub success: bool,
    pub already: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub tab_id: TabId,
    pub state: SessionState,
    pub enabled_domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionErrors {
    pub extension_id: String,
    pub errors: Vec<ConsoleEntry>,
    pub console: Vec<ConsoleEntry>,
}

struct ActiveCapture {
    extension_id: String,
    tab_id: TabId,
    entries: Vec<ConsoleEntry>,
}

struct Registry {
    sessions: HashMap<TabId, DebugSession>,
    tabs: HashMap<TabId, TabStores>,
    extensions: HashMap<String, ExtensionErrorStore>,
    captures: HashMap<u64, ActiveCapture>,
    next_capture: u64,
    throttle: MutationThrottle,
}

/// Per-tab debugging sessions plus every store fed by the global event stream.
///
/// Registry access never spans an await. Attach and detach additionally go
/// through `attach_gate` so the underlying attach happens once per session.
pub struct DebugSessionManager {
    transport: Arc<dyn DebuggerTransport>,
    limits: StoreLimits,
    attach_gate: tokio::sync::Mutex<()>,
    registry: Mutex<Registry>,
}

impl DebugSessionManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn DebuggerTransport>,
        limits: StoreLimits,
        throttle: MutationThrottle,
    ) -> Self {
        Self {
            transport,
            limits,
            attach_gate: tokio::sync::Mutex::new(()),
            registry: Mutex::new(Registry {
                sessions: HashMap::new(),
                tabs: HashMap::new(),
                extensions: HashMap::new(),
                captures: HashMap::new(),
                next_capture: 1,
                throttle,
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn session_state(&self, tab_id: TabId) -> SessionState {
        self.registry()
            .sessions
            .get(&tab_id)
            .map_or(SessionState::Detached, |session| session.state)
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let registry = self.registry();
        let mut sessions = registry
            .sessions
            .iter()
            .map(|(tab_id, session)| SessionSummary {
                tab_id: *tab_id,
                state: session.state,
                enabled_domains: session.enabled_domains.iter().cloned().collect(),
                attached_at: session.attached_at,
            })
            .collect::<Vec<_>>();
        sessions.sort_by_key(|session| session.tab_id);
        sessions
    }

    /// Idempotent: an attached tab reports `already: true` without a second
    /// underlying attach.
    pub async fn attach(&self, tab_id: TabId) -> Result<AttachOutcome, AgentError> {
        let _gate = self.attach_gate.lock().await;
        {
            let mut registry = self.registry();
            let session = registry
                .sessions
                .entry(tab_id)
                .or_insert_with(DebugSession::new);
            if session.state == SessionState::Attached {
                return Ok(AttachOutcome {
                    success: true,
                    already: true,
                });
            }
            session.state = SessionState::Attaching;
        }

        match self.transport.attach(tab_id).await {
            Ok(()) => {
                let mut registry = self.registry();
                let session = registry
                    .sessions
                    .entry(tab_id)
                    .or_insert_with(DebugSession::new);
                session.state = SessionState::Attached;
                session.enabled_domains.clear();
                session.attached_at = Some(now_ms());
                info!("debugger attached tab={tab_id}");
                Ok(AttachOutcome {
                    success: true,
                    already: false,
                })
            }
            Err(error) => {
                self.registry().sessions.remove(&tab_id);
                warn!("debugger attach failed tab={tab_id}: {error}");
                Err(match error {
                    AgentError::Attach { .. } => error,
                    other => AgentError::Attach {
                        tab_id,
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Explicit detach. Returns false when no session was attached. Stores are
    /// kept until the tab closes.
    pub async fn detach(&self, tab_id: TabId) -> Result<bool, AgentError> {
        let _gate = self.attach_gate.lock().await;
        let was_attached = self
            .registry()
            .sessions
            .remove(&tab_id)
            .is_some_and(|session| session.state == SessionState::Attached);
        if !was_attached {
            return Ok(false);
        }

        self.transport.detach(tab_id).await?;
        info!("debugger detached tab={tab_id}");
        Ok(true)
    }

    /// Issues a command, attaching first and enabling the method's domain once
    /// per session. A domain is marked enabled before its enable is sent, so a
    /// failed enable is never retried.
    pub async fn send_command(
        &self,
        tab_id: TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, AgentError> {
        self.attach(tab_id).await?;

        if let Some((domain, command)) = method.split_once('.') {
            let auto_enable = AUTO_ENABLE_DOMAINS.contains(&domain)
                && command != "enable"
                && command != "disable";
            let needs_enable = {
                let mut registry = self.registry();
                registry.sessions.get_mut(&tab_id).is_some_and(|session| {
                    (auto_enable || command == "enable")
                        && session.enabled_domains.insert(domain.to_owned())
                })
            };

            if needs_enable && auto_enable {
                let enable = format!("{domain}.enable");
                debug!("auto-enabling {domain} tab={tab_id}");
                if let Err(error) = self.transport.send_command(tab_id, &enable, json!({})).await {
                    warn!("{enable} failed tab={tab_id}: {error}");
                }
            }
        }

        self.transport
            .send_command(tab_id, method, params)
            .await
            .map_err(|error| match error {
                AgentError::Command { .. } => error,
                other => AgentError::Command {
                    method: method.to_owned(),
                    message: other.to_string(),
                },
            })
    }

    /// `Runtime.evaluate` with `returnByValue`; a thrown exception becomes an error.
    pub async fn evaluate(
        &self,
        tab_id: TabId,
        expression: &str,
        await_promise: bool,
    ) -> Result<Value, AgentError> {
        let response = self
            .send_command(
                tab_id,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": await_promise,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails").filter(|value| !value.is_null()) {
            let message = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("evaluation threw");
            return Err(AgentError::Command {
                method: "Runtime.evaluate".to_owned(),
                message: message.to_owned(),
            });
        }

        Ok(response["result"]["value"].clone())
    }

    /// Applies one event from the global stream, in arrival order.
    pub fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::Debugger(event) => self.handle_debug_event(event),
            HostEvent::Detached { tab_id, reason } => {
                debug!("debugger detached externally tab={tab_id} reason={reason}");
                self.on_detached(tab_id);
            }
            HostEvent::TabClosed { tab_id } => self.on_tab_closed(tab_id),
        }
    }

    fn handle_debug_event(&self, event: DebugEvent) {
        let DebugEvent {
            tab_id,
            method,
            params,
        } = event;

        if method == "Inspector.detached" {
            self.on_detached(tab_id);
            return;
        }

        let limits = self.limits;
        let mut registry = self.registry();
        let registry = &mut *registry;

        if method.starts_with("Network.") {
            registry
                .tabs
                .entry(tab_id)
                .or_insert_with(|| TabStores::new(limits))
                .record_network(&method, &params);
            return;
        }

        if method.starts_with("Animation.") {
            registry
                .tabs
                .entry(tab_id)
                .or_insert_with(|| TabStores::new(limits))
                .record_animation(&method, &params);
            return;
        }

        let console_entry = match method.as_str() {
            "Runtime.consoleAPICalled" => Some(ConsoleEntry::from_console_api(&params)),
            "Runtime.exceptionThrown" => Some(ConsoleEntry::from_exception(&params)),
            "Log.entryAdded" => Some(ConsoleEntry::from_log_entry(&params)),
            _ => None,
        };
        if let Some(entry) = console_entry {
            for capture in registry
                .captures
                .values_mut()
                .filter(|capture| capture.tab_id == tab_id)
            {
                registry
                    .extensions
                    .entry(capture.extension_id.clone())
                    .or_insert_with(|| ExtensionErrorStore::new(limits.extension))
                    .record(&entry);
                capture.entries.push(entry.clone());
            }
            registry
                .tabs
                .entry(tab_id)
                .or_insert_with(|| TabStores::new(limits))
                .console
                .push(entry);
            return;
        }

        if MUTATION_EVENTS.contains(&method.as_str()) {
            let Some(node_id) = params["nodeId"]
                .as_i64()
                .or_else(|| params["parentNodeId"].as_i64())
            else {
                return;
            };
            if registry.throttle.observe(tab_id, node_id, Instant::now())
                == ThrottleDecision::Suppress
            {
                return;
            }
            let detail = params["name"]
                .as_str()
                .or_else(|| params["characterData"].as_str())
                .map(str::to_owned);
            registry
                .tabs
                .entry(tab_id)
                .or_insert_with(|| TabStores::new(limits))
                .mutations
                .push(MutationEntry {
                    timestamp: now_ms(),
                    node_id,
                    kind: method.trim_start_matches("DOM.").to_owned(),
                    detail,
                });
        }
    }

    /// Unsolicited detach: the session returns to `Detached`; stores stay.
    pub fn on_detached(&self, tab_id: TabId) {
        let mut registry = self.registry();
        if registry.sessions.remove(&tab_id).is_some() {
            info!("debug session reset tab={tab_id}");
        }
        registry.throttle.prune(Instant::now());
    }

    /// Purges the session and every per-tab store. Extension stores survive.
    pub fn on_tab_closed(&self, tab_id: TabId) {
        let mut registry = self.registry();
        registry.sessions.remove(&tab_id);
        registry.tabs.remove(&tab_id);
        registry.throttle.forget_tab(tab_id);
        debug!("tab state purged tab={tab_id}");
    }

    /// Feeds the manager from the host's global event stream until it closes.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<HostEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_event(event);
            }
            debug!("host event stream closed");
        })
    }

    #[must_use]
    pub fn console_logs(&self, tab_id: TabId, limit: Option<usize>) -> LogPage<ConsoleEntry> {
        self.registry()
            .tabs
            .get(&tab_id)
            .map(|stores| stores.console.page(limit))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn network_log(&self, tab_id: TabId, limit: Option<usize>) -> LogPage<NetworkEntry> {
        self.registry()
            .tabs
            .get(&tab_id)
            .map(|stores| stores.network.page(limit))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn animations(&self, tab_id: TabId, limit: Option<usize>) -> LogPage<AnimationEntry> {
        self.registry()
            .tabs
            .get(&tab_id)
            .map(|stores| stores.animations.page(limit))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn dom_mutations(&self, tab_id: TabId, limit: Option<usize>) -> LogPage<MutationEntry> {
        self.registry()
            .tabs
            .get(&tab_id)
            .map(|stores| stores.mutations.page(limit))
            .unwrap_or_default()
    }

    pub fn clear_tab(&self, tab_id: TabId) {
        if let Some(stores) = self.registry().tabs.get_mut(&tab_id) {
            stores.clear();
        }
    }

    #[must_use]
    pub fn extension_errors(&self, extension_id: &str) -> ExtensionErrors {
        let registry = self.registry();
        let (errors, console) = registry
            .extensions
            .get(extension_id)
            .map(|store| (store.errors.recent(None), store.console.recent(None)))
            .unwrap_or_default();
        ExtensionErrors {
            extension_id: extension_id.to_owned(),
            errors,
            console,
        }
    }

    /// Empties the extension's store. Returns false when nothing was recorded.
    pub fn clear_extension(&self, extension_id: &str) -> bool {
        match self.registry().extensions.get_mut(extension_id) {
            Some(store) => {
                store.clear();
                true
            }
            None => false,
        }
    }

    /// Routes console events of `tab_id` into the extension's store until the
    /// returned listener is finished or dropped.
    #[must_use]
    pub fn begin_capture(self: &Arc<Self>, extension_id: &str, tab_id: TabId) -> CaptureListener {
        let mut registry = self.registry();
        let id = registry.next_capture;
        registry.next_capture += 1;
        registry.captures.insert(
            id,
            ActiveCapture {
                extension_id: extension_id.to_owned(),
                tab_id,
                entries: Vec::new(),
            },
        );
        registry
            .extensions
            .entry(extension_id.to_owned())
            .or_insert_with(|| ExtensionErrorStore::new(self.limits.extension));
        debug!("capture listener installed id={id} extension={extension_id} tab={tab_id}");

        CaptureListener {
            manager: Arc::clone(self),
            id,
        }
    }

    #[must_use]
    pub fn active_captures(&self) -> usize {
        self.registry().captures.len()
    }
}

/// Scoped capture registration. Removing it on drop keeps the listener from
/// outliving its capture on any exit path.
pub struct CaptureListener {
    manager: Arc<DebugSessionManager>,
    id: u64,
}

impl CaptureListener {
    /// Adds entries surfaced outside the event stream (probe markers).
    pub fn record(&self, entries: Vec<ConsoleEntry>) {
        let mut registry = self.manager.registry();
        let registry = &mut *registry;
        let Some(capture) = registry.captures.get_mut(&self.id) else {
            return;
        };
        let store = registry
            .extensions
            .entry(capture.extension_id.clone())
            .or_insert_with(|| ExtensionErrorStore::new(self.manager.limits.extension));
        for entry in entries {
            store.record(&entry);
            capture.entries.push(entry);
        }
    }

    /// Removes the listener and returns what it saw during the window.
    #[must_use]
    pub fn finish(self) -> Vec<ConsoleEntry> {
        self.manager
            .registry()
            .captures
            .remove(&self.id)
            .map(|capture| capture.entries)
            .unwrap_or_default()
    }
}

impl Drop for CaptureListener {
    fn drop(&mut self) {
        if self.manager.registry().captures.remove(&self.id).is_some() {
            debug!("capture listener removed id={}", self.id);
        }
    }
}
