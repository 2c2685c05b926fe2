use std::{future::Future, net::SocketAddr};

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::{application::state::SharedState, domain::error::RelayError, interfaces::ws};

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Serves the peer listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr().map_err(|error| {
        RelayError::Unavailable(format!("failed to read listener address: {error}"))
    })?;

    info!(
        "tabrelay-core accepting browser agent on ws://{}:{}, auth={}",
        local_addr.ip(),
        local_addr.port(),
        if state.config().peer_token.is_some() {
            "token"
        } else {
            "none"
        },
    );

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|error| RelayError::Unavailable(format!("peer listener error: {error}")))
}

async fn healthz_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health_payload().await)
}
