use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    application::state::SharedState,
    domain::{error::RelayError, models::PeerRole},
    protocol::{PeerMessage, decode_peer_message},
    relay::PeerOutbound,
    security::auth::authorize_peer,
};

/// Two consecutive unanswered pings close the channel.
pub const MAX_UNANSWERED_PINGS: u32 = 2;

pub const RELAY_CLIENT_NAME: &str = "tabrelay-core";

/// Transport-neutral view of one peer connection. The socket adapters pump raw
/// text frames in and encode outbound messages.
pub struct PeerLink {
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub outbound: PeerOutbound,
}

/// Runs one peer connection to completion. The caller must already hold the
/// relay's peer slot (`RelayCore::try_claim`); it is released on every exit path.
///
/// Returns an error only when registration never completed.
pub async fn run(state: &SharedState, mut link: PeerLink, role: PeerRole) -> Result<(), RelayError> {
    let result = match register(state, &mut link, role).await {
        Ok(client) => {
            state.relay().peer_registered(link.outbound.clone()).await;
            info!("browser agent registered client={client} role={role}");
            if let Err(error) = serve_registered(state, &mut link).await {
                warn!("peer channel closed role={role}: {error}");
            }
            Ok(())
        }
        Err(error) => {
            warn!("peer registration failed role={role}: {error}");
            Err(error)
        }
    };

    state.relay().peer_disconnected().await;
    result
}

async fn register(
    state: &SharedState,
    link: &mut PeerLink,
    role: PeerRole,
) -> Result<String, RelayError> {
    if role == PeerRole::Client {
        send(
            link,
            PeerMessage::Register {
                client: RELAY_CLIENT_NAME.to_owned(),
                token: state.config().peer_token.clone(),
            },
        )?;
    }

    let deadline = state.config().register_timeout;
    timeout(deadline, await_registration(state, link, role))
        .await
        .map_err(|_| RelayError::Unavailable("peer registration timed out".to_owned()))?
}

async fn await_registration(
    state: &SharedState,
    link: &mut PeerLink,
    role: PeerRole,
) -> Result<String, RelayError> {
    loop {
        let text = link.inbound.recv().await.ok_or(RelayError::PeerDisconnected)?;
        let message = match decode_peer_message(&text) {
            Ok(message) => message,
            Err(error) => {
                warn!("ignoring malformed peer message during registration: {}", error.message);
                continue;
            }
        };

        match (role, message) {
            (PeerRole::Server, PeerMessage::Register { client, token }) => {
                if let Err(reason) =
                    authorize_peer(state.config().peer_token.as_deref(), token.as_deref())
                {
                    let _ = send(
                        link,
                        PeerMessage::Error {
                            message: reason.message().to_owned(),
                        },
                    );
                    return Err(RelayError::Unavailable(reason.message().to_owned()));
                }
                send(link, PeerMessage::Registered)?;
                return Ok(client);
            }
            (PeerRole::Client, PeerMessage::Registered) => return Ok("listener".to_owned()),
            (_, PeerMessage::Ping) => send(link, PeerMessage::Pong)?,
            (_, PeerMessage::Error { message }) => {
                return Err(RelayError::Unavailable(format!(
                    "peer refused registration: {message}"
                )));
            }
            (_, other) => debug!("ignoring {} before registration", other.kind()),
        }
    }
}

async fn serve_registered(state: &SharedState, link: &mut PeerLink) -> Result<(), RelayError> {
    let ping_interval = state.peer_settings().await.ping_interval;
    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut unanswered = 0_u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if unanswered >= MAX_UNANSWERED_PINGS {
                    warn!("browser agent missed {unanswered} pings; closing peer channel");
                    return Err(RelayError::PeerDisconnected);
                }
                send(link, PeerMessage::Ping)?;
                unanswered += 1;
            }
            next = link.inbound.recv() => {
                let Some(text) = next else {
                    debug!("peer channel inbound closed");
                    return Ok(());
                };
                let message = match decode_peer_message(&text) {
                    Ok(message) => message,
                    Err(error) => {
                        warn!("dropping malformed peer message: {}", error.message);
                        continue;
                    }
                };

                match message {
                    PeerMessage::ToolResult { id, result } => {
                        state.relay().resolve(id, result).await;
                    }
                    PeerMessage::Pong => unanswered = 0,
                    PeerMessage::Ping => send(link, PeerMessage::Pong)?,
                    PeerMessage::Register { client, .. } => {
                        debug!("peer re-registered client={client}");
                        send(link, PeerMessage::Registered)?;
                    }
                    PeerMessage::Registered => {}
                    PeerMessage::Error { message } => warn!("browser agent reported error: {message}"),
                    PeerMessage::ToolCall { id, tool, .. } => {
                        warn!("ignoring tool_call from browser agent id={id} tool={tool}");
                    }
                }
            }
        }
    }
}

fn send(link: &PeerLink, message: PeerMessage) -> Result<(), RelayError> {
    link.outbound
        .send(message)
        .map_err(|_| RelayError::PeerDisconnected)
}
