use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use serde_json::{Value, json};
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
};
use tokio_util::sync::CancellationToken;

use crate::{
    application::config::{PeerSettings, RuntimeConfig},
    domain::models::{LinkStatus, PeerConnectionState, PeerRole},
    relay::RelayCore,
};

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<InnerState>,
}

struct InnerState {
    config: RuntimeConfig,
    relay: RelayCore,
    started_at: Instant,
    peer_settings: RwLock<PeerSettings>,
    peer_role: RwLock<Option<PeerRole>>,
    link_status: RwLock<LinkStatus>,
    supervisor_started: AtomicBool,
    prebound_listener: Mutex<Option<TcpListener>>,
    next_message_id: AtomicU64,
    shutdown: CancellationToken,
}

impl SharedState {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self::build(config, None)
    }

    /// Uses an already bound listener for the server role instead of probing.
    #[must_use]
    pub fn with_listener(config: RuntimeConfig, listener: TcpListener) -> Self {
        Self::build(config, Some(listener))
    }

    fn build(config: RuntimeConfig, listener: Option<TcpListener>) -> Self {
        Self {
            inner: Arc::new(InnerState {
                relay: RelayCore::new(config.relay_timings()),
                started_at: Instant::now(),
                peer_settings: RwLock::new(config.peer),
                peer_role: RwLock::new(None),
                link_status: RwLock::new(LinkStatus::Idle),
                supervisor_started: AtomicBool::new(false),
                prebound_listener: Mutex::new(listener),
                next_message_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn relay(&self) -> &RelayCore {
        &self.inner.relay
    }

    #[must_use]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.inner.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub async fn peer_settings(&self) -> PeerSettings {
        *self.inner.peer_settings.read().await
    }

    /// Applies handshake overrides. Ignored once the peer channel has started.
    pub async fn update_peer_settings(&self, update: impl FnOnce(&mut PeerSettings)) -> bool {
        if self.supervisor_started() {
            return false;
        }
        update(&mut *self.inner.peer_settings.write().await);
        true
    }

    #[must_use]
    pub fn supervisor_started(&self) -> bool {
        self.inner.supervisor_started.load(Ordering::SeqCst)
    }

    /// Returns true for exactly one caller: the one that should start the supervisor.
    pub(crate) fn mark_supervisor_started(&self) -> bool {
        self.inner
            .supervisor_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) async fn take_prebound_listener(&self) -> Option<TcpListener> {
        self.inner.prebound_listener.lock().await.take()
    }

    pub async fn peer_role(&self) -> Option<PeerRole> {
        *self.inner.peer_role.read().await
    }

    pub(crate) async fn set_peer_role(&self, role: Option<PeerRole>) {
        *self.inner.peer_role.write().await = role;
    }

    pub async fn link_status(&self) -> LinkStatus {
        *self.inner.link_status.read().await
    }

    pub(crate) async fn set_link_status(&self, status: LinkStatus) {
        *self.inner.link_status.write().await = status;
    }

    /// Monotonic id for messages the front originates on its own.
    #[must_use]
    pub fn next_message_id(&self) -> u64 {
        self.inner.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub async fn health_payload(&self) -> Value {
        let relay = self.relay();
        let state = relay.state();
        json!({
            "ok": true,
            "runtime": "tabrelay-core",
            "version": self.config().runtime_version,
            "uptimeMs": self.uptime_ms(),
            "peer": {
                "state": state,
                "role": self.peer_role().await,
                "link": self.link_status().await,
                "connected": state == PeerConnectionState::Registered,
            },
            "pendingCalls": relay.pending_count().await,
            "queuedCalls": relay.queued_len().await,
            "callsSent": relay.calls_sent(),
        })
    }
}
