use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    domain::{
        error::RelayError,
        models::{CorrelationId, PeerConnectionState},
    },
    protocol::PeerMessage,
};

/// Outbound half of the active peer channel.
pub type PeerOutbound = mpsc::UnboundedSender<PeerMessage>;

#[derive(Debug, Clone, Copy)]
pub struct RelayTimings {
    pub call_timeout: Duration,
    pub inter_call_delay: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            inter_call_delay: Duration::from_millis(50),
        }
    }
}

struct QueuedRequest {
    tool: String,
    params: Value,
    reply: oneshot::Sender<Value>,
    queued_at: Instant,
}

struct PendingCall {
    tool: String,
    submitted_at: Instant,
    resolve: oneshot::Sender<Value>,
}

#[derive(Default)]
struct RelayTable {
    queue: VecDeque<QueuedRequest>,
    pending: HashMap<CorrelationId, PendingCall>,
    peer: Option<PeerOutbound>,
    draining: bool,
}

/// Correlates tool calls with the single browser-agent peer.
///
/// All table mutation happens inside one lock scope with no await in between,
/// so back-to-back handlers never observe a half-applied transition.
#[derive(Clone)]
pub struct RelayCore {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    timings: RelayTimings,
    next_id: AtomicU64,
    calls_sent: AtomicU64,
    state: watch::Sender<PeerConnectionState>,
    table: Mutex<RelayTable>,
}

impl RelayCore {
    #[must_use]
    pub fn new(timings: RelayTimings) -> Self {
        let (state, _) = watch::channel(PeerConnectionState::Unconnected);
        Self {
            inner: Arc::new(RelayInner {
                timings,
                next_id: AtomicU64::new(1),
                calls_sent: AtomicU64::new(0),
                state,
                table: Mutex::new(RelayTable::default()),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> PeerConnectionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PeerConnectionState> {
        self.inner.state.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.table.lock().await.pending.len()
    }

    pub async fn queued_len(&self) -> usize {
        self.inner.table.lock().await.queue.len()
    }

    #[must_use]
    pub fn calls_sent(&self) -> u64 {
        self.inner.calls_sent.load(Ordering::Relaxed)
    }

    /// Submits a tool call. Always resolves exactly once, with either the peer's
    /// result or an `{"error": ...}` value.
    pub async fn submit(&self, tool: &str, params: Value) -> Value {
        let (reply, receiver) = oneshot::channel();
        {
            let mut table = self.inner.table.lock().await;
            let state = self.state();
            if !state.accepts_calls() {
                debug!("rejecting tool call tool={tool} state={state}");
                return RelayError::NotConnected.into_tool_result();
            }

            table.queue.push_back(QueuedRequest {
                tool: tool.to_owned(),
                params,
                reply,
                queued_at: Instant::now(),
            });

            if !table.draining {
                table.draining = true;
                tokio::spawn(self.clone().drain());
            }
        }

        receiver
            .await
            .unwrap_or_else(|_| RelayError::PeerDisconnected.into_tool_result())
    }

    async fn drain(self) {
        loop {
            let next = {
                let mut table = self.inner.table.lock().await;
                match table.queue.pop_front() {
                    Some(request) => request,
                    None => {
                        table.draining = false;
                        return;
                    }
                }
            };

            debug!(
                "dispatching tool call tool={} queued_ms={}",
                next.tool,
                next.queued_at.elapsed().as_millis()
            );
            let outcome = self.dispatch(&next.tool, next.params).await;
            let _ = next.reply.send(outcome);

            sleep(self.inner.timings.inter_call_delay).await;
        }
    }

    async fn dispatch(&self, tool: &str, params: Value) -> Value {
        if let Err(error) = self.wait_for_registration().await {
            return error.into_tool_result();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolve, resolved) = oneshot::channel();
        {
            let mut table = self.inner.table.lock().await;
            let Some(peer) = table.peer.clone() else {
                return RelayError::NotConnected.into_tool_result();
            };

            table.pending.insert(
                id,
                PendingCall {
                    tool: tool.to_owned(),
                    submitted_at: Instant::now(),
                    resolve,
                },
            );

            let message = PeerMessage::ToolCall {
                id,
                tool: tool.to_owned(),
                params,
            };
            if peer.send(message).is_err() {
                table.pending.remove(&id);
                return RelayError::PeerDisconnected.into_tool_result();
            }
            self.inner.calls_sent.fetch_add(1, Ordering::Relaxed);
        }

        match timeout(self.inner.timings.call_timeout, resolved).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => RelayError::PeerDisconnected.into_tool_result(),
            Err(_) => {
                self.inner.table.lock().await.pending.remove(&id);
                warn!("tool call timed out id={id} tool={tool}");
                RelayError::Timeout.into_tool_result()
            }
        }
    }

    async fn wait_for_registration(&self) -> Result<(), RelayError> {
        let mut state = self.subscribe();
        let settled = timeout(self.inner.timings.call_timeout, async {
            state
                .wait_for(|current| *current != PeerConnectionState::Connecting)
                .await
                .map(|current| *current)
        })
        .await;

        match settled {
            Ok(Ok(PeerConnectionState::Registered)) => Ok(()),
            Ok(_) => Err(RelayError::NotConnected),
            Err(_) => Err(RelayError::Timeout),
        }
    }

    /// Delivers a `tool_result`. Unknown or already-resolved ids are dropped.
    pub async fn resolve(&self, id: CorrelationId, result: Value) -> bool {
        let pending = self.inner.table.lock().await.pending.remove(&id);
        match pending {
            Some(call) => {
                debug!(
                    "tool call resolved id={id} tool={} elapsed_ms={}",
                    call.tool,
                    call.submitted_at.elapsed().as_millis()
                );
                let _ = call.resolve.send(result);
                true
            }
            None => {
                debug!("discarding stale tool_result id={id}");
                false
            }
        }
    }

    /// Claims the single peer slot, moving `Unconnected -> Connecting`.
    pub async fn try_claim(&self) -> Result<(), RelayError> {
        let _table = self.inner.table.lock().await;
        let state = self.state();
        if state != PeerConnectionState::Unconnected {
            return Err(RelayError::Unavailable(format!(
                "a browser agent peer is already active (state={state})"
            )));
        }
        self.inner.state.send_replace(PeerConnectionState::Connecting);
        Ok(())
    }

    pub async fn peer_registered(&self, outbound: PeerOutbound) {
        let mut table = self.inner.table.lock().await;
        table.peer = Some(outbound);
        self.inner.state.send_replace(PeerConnectionState::Registered);
        info!("peer channel registered");
    }

    /// Tears down the peer slot. Every pending and queued call is resolved with a
    /// connection-closed error; nothing is retried.
    pub async fn peer_disconnected(&self) {
        let (pending, queued) = {
            let mut table = self.inner.table.lock().await;
            if self.state() == PeerConnectionState::Unconnected && table.peer.is_none() {
                return;
            }
            self.inner
                .state
                .send_replace(PeerConnectionState::Disconnecting);
            table.peer = None;
            let pending = table.pending.drain().map(|(_, call)| call).collect::<Vec<_>>();
            let queued = table.queue.drain(..).collect::<Vec<_>>();
            self.inner.state.send_replace(PeerConnectionState::Unconnected);
            (pending, queued)
        };

        if !pending.is_empty() || !queued.is_empty() {
            info!(
                "peer channel closed; failing pending={} queued={}",
                pending.len(),
                queued.len()
            );
        } else {
            info!("peer channel closed");
        }

        for call in pending {
            let _ = call
                .resolve
                .send(RelayError::PeerDisconnected.into_tool_result());
        }
        for request in queued {
            let _ = request
                .reply
                .send(RelayError::PeerDisconnected.into_tool_result());
        }
    }
}
