use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::{
    agent::{
        error::AgentError,
        host::{BrowserHost, DebugEvent, DebuggerTransport, HostEvent, TabInfo},
    },
    domain::models::TabId,
};

/// Scriptable in-memory browser: records every attach and command.
#[derive(Default)]
pub(crate) struct MockBrowser {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    attaches: HashMap<TabId, usize>,
    commands: Vec<(TabId, String)>,
    failing: HashSet<String>,
    responses: HashMap<String, Value>,
    active_tab: Option<TabId>,
    opened: Vec<TabId>,
    closed: Vec<TabId>,
    extension_state: HashMap<String, Map<String, Value>>,
    content_tabs: HashSet<TabId>,
    events: Option<mpsc::UnboundedSender<HostEvent>>,
    on_runtime_enable: Vec<(String, Value)>,
    fail_open: bool,
}

impl MockBrowser {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach_count(&self, tab_id: TabId) -> usize {
        self.state().attaches.get(&tab_id).copied().unwrap_or(0)
    }

    pub(crate) fn command_count(&self, tab_id: TabId, method: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|(tab, name)| *tab == tab_id && name == method)
            .count()
    }

    pub(crate) fn fail_method(&self, method: &str) {
        self.state().failing.insert(method.to_owned());
    }

    pub(crate) fn respond(&self, method: &str, response: Value) {
        self.state().responses.insert(method.to_owned(), response);
    }

    pub(crate) fn set_active_tab(&self, tab_id: Option<TabId>) {
        self.state().active_tab = tab_id;
    }

    pub(crate) fn set_extension_state(&self, extension_id: &str, values: Value) {
        let values = values.as_object().cloned().unwrap_or_default();
        self.state()
            .extension_state
            .insert(extension_id.to_owned(), values);
    }

    pub(crate) fn with_content_script(&self, tab_id: TabId) {
        self.state().content_tabs.insert(tab_id);
    }

    pub(crate) fn fail_open(&self) {
        self.state().fail_open = true;
    }

    /// Events replayed for the tab whenever `Runtime.enable` is sent to it.
    pub(crate) fn emit_on_runtime_enable(
        &self,
        events: mpsc::UnboundedSender<HostEvent>,
        script: Vec<(&str, Value)>,
    ) {
        let mut state = self.state();
        state.events = Some(events);
        state.on_runtime_enable = script
            .into_iter()
            .map(|(method, params)| (method.to_owned(), params))
            .collect();
    }

    pub(crate) fn opened(&self) -> Vec<TabId> {
        self.state().opened.clone()
    }

    pub(crate) fn closed(&self) -> Vec<TabId> {
        self.state().closed.clone()
    }
}

#[async_trait]
impl DebuggerTransport for MockBrowser {
    async fn attach(&self, tab_id: TabId) -> Result<(), AgentError> {
        let mut state = self.state();
        if state.failing.contains("attach") {
            return Err(AgentError::Host("Cannot access a chrome:// URL".to_owned()));
        }
        *state.attaches.entry(tab_id).or_default() += 1;
        Ok(())
    }

    async fn detach(&self, _tab_id: TabId) -> Result<(), AgentError> {
        Ok(())
    }

    async fn send_command(
        &self,
        tab_id: TabId,
        method: &str,
        _params: Value,
    ) -> Result<Value, AgentError> {
        let mut state = self.state();
        state.commands.push((tab_id, method.to_owned()));
        if state.failing.contains(method) {
            return Err(AgentError::Host(format!("{method} rejected")));
        }
        if method == "Runtime.enable" {
            if let Some(events) = &state.events {
                for (name, params) in &state.on_runtime_enable {
                    let _ = events.send(HostEvent::Debugger(DebugEvent {
                        tab_id,
                        method: name.clone(),
                        params: params.clone(),
                    }));
                }
            }
        }
        Ok(state
            .responses
            .get(method)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

#[async_trait]
impl BrowserHost for MockBrowser {
    async fn active_tab(&self) -> Option<TabId> {
        self.state().active_tab
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, AgentError> {
        let state = self.state();
        Ok(state
            .active_tab
            .map(|id| TabInfo {
                id,
                url: "https://example.test/".to_owned(),
                title: "Example".to_owned(),
                active: true,
            })
            .into_iter()
            .collect())
    }

    async fn open_extension_page(
        &self,
        _extension_id: &str,
        _page: &str,
    ) -> Result<TabId, AgentError> {
        let mut state = self.state();
        if state.fail_open {
            return Err(AgentError::Host("extension not installed".to_owned()));
        }
        let tab_id = 100 + TabId::try_from(state.opened.len()).unwrap_or_default();
        state.opened.push(tab_id);
        Ok(tab_id)
    }

    async fn close_tab(&self, tab_id: TabId) -> Result<(), AgentError> {
        self.state().closed.push(tab_id);
        Ok(())
    }

    async fn extension_state(&self, extension_id: &str) -> Result<Map<String, Value>, AgentError> {
        Ok(self
            .state()
            .extension_state
            .get(extension_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_to_content_script(
        &self,
        tab_id: TabId,
        tool: &str,
        params: Value,
    ) -> Result<Value, AgentError> {
        if !self.state().content_tabs.contains(&tab_id) {
            return Err(AgentError::ContentScriptUnreachable(tab_id));
        }
        Ok(json!({ "tool": tool, "params": params, "tabId": tab_id }))
    }
}
