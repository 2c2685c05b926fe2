//! Browser-side agent: executes relayed tool calls against per-tab debugging
//! sessions and keeps the capture stores those tools query.

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod link;
pub mod markers;
pub mod policy;
pub mod session;
pub mod stores;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use self::{
    config::AgentConfig,
    dispatcher::ToolDispatcher,
    host::{BrowserHost, DebuggerTransport, HostEvent},
    link::AgentLink,
    session::DebugSessionManager,
    throttle::MutationThrottle,
};

/// Wires a host into a dispatcher, a session manager fed by the host's event
/// stream, and the relay link.
pub struct BrowserAgent {
    dispatcher: Arc<ToolDispatcher>,
    link: Arc<AgentLink>,
    event_pump: JoinHandle<()>,
}

impl BrowserAgent {
    #[must_use]
    pub fn new(
        config: AgentConfig,
        host: Arc<dyn BrowserHost>,
        transport: Arc<dyn DebuggerTransport>,
        events: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Self {
        let sessions = Arc::new(DebugSessionManager::new(
            transport,
            config.store_limits(),
            MutationThrottle::new(config.mutation_max_changes, config.mutation_window()),
        ));
        let event_pump = sessions.spawn_event_pump(events);
        let dispatcher = Arc::new(ToolDispatcher::new(host, sessions, config.clone()));
        let link = Arc::new(AgentLink::new(config, Arc::clone(&dispatcher)));

        Self {
            dispatcher,
            link,
            event_pump,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn link(&self) -> &Arc<AgentLink> {
        &self.link
    }

    /// Runs the relay link until it gives up or `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        self.link.run(shutdown).await;
        self.event_pump.abort();
    }
}
