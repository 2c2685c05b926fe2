use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    agent::{config::AgentConfig, dispatcher::ToolDispatcher, error::AgentError},
    domain::models::{CorrelationId, LinkStatus},
    protocol::{PeerMessage, decode_peer_message, encode_peer_message},
};

/// The browser agent's side of the peer channel: dials the relay, registers,
/// and feeds `tool_call`s to the dispatcher one at a time.
pub struct AgentLink {
    config: AgentConfig,
    dispatcher: Arc<ToolDispatcher>,
    status: watch::Sender<LinkStatus>,
}

impl AgentLink {
    #[must_use]
    pub fn new(config: AgentConfig, dispatcher: Arc<ToolDispatcher>) -> Self {
        let (status, _) = watch::channel(LinkStatus::Idle);
        Self {
            config,
            dispatcher,
            status,
        }
    }

    #[must_use]
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    /// Connects and reconnects until shutdown, auto-reconnect being off, or the
    /// attempt budget running out. Ends in `LinkStatus::Disconnected`.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut failures = 0_u32;
        self.status.send_replace(LinkStatus::Connecting);

        loop {
            let outcome = tokio::select! {
                outcome = self.connect_once() => outcome,
                () = shutdown.cancelled() => break,
            };

            match outcome {
                Ok(()) => failures = 0,
                Err(error) => {
                    failures += 1;
                    warn!("relay connection attempt {failures} failed: {error}");
                }
            }

            if !self.config.auto_reconnect {
                info!("relay connection closed; auto-reconnect is off");
                break;
            }
            if failures >= self.config.max_reconnect_attempts {
                warn!("giving up on relay after {failures} failed attempts");
                break;
            }

            self.status.send_replace(LinkStatus::Reconnecting {
                attempt: failures + 1,
            });
            tokio::select! {
                () = sleep(self.config.reconnect_delay()) => {}
                () = shutdown.cancelled() => break,
            }
        }

        self.status.send_replace(LinkStatus::Disconnected);
    }

    /// One connection. `Ok` once a registered session has ended.
    async fn connect_once(&self) -> Result<(), AgentError> {
        let url = self.config.relay_url.as_str();
        let (socket, _) = timeout(self.config.connect_timeout(), connect_async(url))
            .await
            .map_err(|_| AgentError::Host(format!("connect to {url} timed out")))?
            .map_err(|error| AgentError::Host(format!("failed to connect to {url}: {error}")))?;
        let (mut sink, mut stream) = socket.split();

        let register = PeerMessage::Register {
            client: self.config.client_name.clone(),
            token: self.config.token.clone(),
        };
        sink.send(Message::Text(encode(&register)?.into()))
            .await
            .map_err(|error| AgentError::Host(format!("failed to register: {error}")))?;

        let registered = timeout(self.config.connect_timeout(), async {
            while let Some(next) = stream.next().await {
                let Ok(Message::Text(text)) = next else {
                    continue;
                };
                match decode_peer_message(text.as_str()) {
                    Ok(PeerMessage::Registered) => return Ok(()),
                    Ok(PeerMessage::Error { message }) => return Err(AgentError::Host(message)),
                    Ok(other) => debug!("ignoring {} before registration", other.kind()),
                    Err(error) => warn!("malformed relay message: {}", error.message),
                }
            }
            Err(AgentError::Host("relay closed before registration".to_owned()))
        })
        .await
        .map_err(|_| AgentError::Host("registration timed out".to_owned()))?;
        registered?;

        self.status.send_replace(LinkStatus::Connected);
        info!("registered with relay at {url}");

        let (calls_tx, mut calls_rx) = mpsc::unbounded_channel::<(CorrelationId, String, Value)>();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<PeerMessage>();
        let dispatcher = Arc::clone(&self.dispatcher);
        let worker = tokio::spawn(async move {
            while let Some((id, tool, params)) = calls_rx.recv().await {
                let result = dispatcher.execute(&tool, params).await;
                if results_tx.send(PeerMessage::ToolResult { id, result }).is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                Some(result) = results_rx.recv() => {
                    if let Err(error) = sink.send(Message::Text(encode(&result)?.into())).await {
                        warn!("failed to send tool_result: {error}");
                        break;
                    }
                }
                next = stream.next() => {
                    let text = match next {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(error)) => {
                            warn!("relay connection failed: {error}");
                            break;
                        }
                    };
                    match decode_peer_message(text.as_str()) {
                        Ok(PeerMessage::ToolCall { id, tool, params }) => {
                            debug!("queued tool_call id={id} tool={tool}");
                            let _ = calls_tx.send((id, tool, params));
                        }
                        Ok(PeerMessage::Ping) => {
                            let pong = encode(&PeerMessage::Pong)?;
                            if sink.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(PeerMessage::Error { message }) => warn!("relay reported error: {message}"),
                        Ok(other) => debug!("ignoring {} from relay", other.kind()),
                        Err(error) => warn!("malformed relay message: {}", error.message),
                    }
                }
            }
        }

        worker.abort();
        info!("relay connection closed");
        Ok(())
    }
}

fn encode(message: &PeerMessage) -> Result<String, AgentError> {
    encode_peer_message(message)
        .map_err(|error| AgentError::Host(format!("failed to encode peer message: {error}")))
}
