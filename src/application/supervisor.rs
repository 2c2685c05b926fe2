use tokio::{net::TcpListener, time::sleep};
use tracing::{info, warn};

use crate::{
    application::state::SharedState,
    domain::{
        error::RelayError,
        models::{LinkStatus, PeerRole},
    },
    interfaces::{http, peer_client, probe::probe},
};

/// Starts the peer-channel supervisor on first call; later calls are no-ops.
pub fn ensure_started(state: &SharedState) {
    if !state.mark_supervisor_started() {
        return;
    }
    let state = state.clone();
    tokio::spawn(async move { run(state).await });
}

async fn run(state: SharedState) {
    let shutdown = state.shutdown_token();
    let max_attempts = state.config().max_reconnect_attempts;
    let mut failures = 0_u32;

    loop {
        let outcome = tokio::select! {
            outcome = run_once(&state) => outcome,
            () = shutdown.cancelled() => break,
        };
        state.set_peer_role(None).await;
        if shutdown.is_cancelled() {
            break;
        }

        match outcome {
            Ok(()) => failures = 0,
            Err(error) => {
                failures += 1;
                warn!("peer channel attempt {failures} failed: {error}");
            }
        }

        if !state.peer_settings().await.auto_reconnect {
            info!("peer channel disconnected; auto-reconnect is off");
            break;
        }
        if failures >= max_attempts {
            warn!("peer channel disconnected after {failures} failed attempts");
            break;
        }

        state
            .set_link_status(LinkStatus::Reconnecting {
                attempt: failures + 1,
            })
            .await;
        tokio::select! {
            () = sleep(state.config().reconnect_delay) => {}
            () = shutdown.cancelled() => break,
        }
    }

    state.set_link_status(LinkStatus::Disconnected).await;
}

/// One role negotiation followed by one peer session (client) or one listener
/// lifetime (server).
async fn run_once(state: &SharedState) -> Result<(), RelayError> {
    let listener = match state.take_prebound_listener().await {
        Some(listener) => Some(listener),
        None => {
            let addr = state.config().peer_addr();
            match probe(addr, state.config().probe_timeout).await {
                PeerRole::Server => Some(TcpListener::bind(addr).await.map_err(|error| {
                    RelayError::Unavailable(format!("failed to bind {addr}: {error}"))
                })?),
                PeerRole::Client => None,
            }
        }
    };

    match listener {
        Some(listener) => {
            state.set_peer_role(Some(PeerRole::Server)).await;
            state.set_link_status(LinkStatus::Listening).await;
            let shutdown = state.shutdown_token();
            http::serve(listener, state.clone(), shutdown.cancelled_owned()).await
        }
        None => {
            state.set_peer_role(Some(PeerRole::Client)).await;
            state.set_link_status(LinkStatus::Connecting).await;
            peer_client::connect_and_run(state).await
        }
    }
}
