use std::net::SocketAddr;

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    application::state::SharedState,
    domain::models::PeerRole,
    interfaces::peer_session::{self, PeerLink},
    protocol::{ERROR_INVALID_REQUEST, ErrorShape, PeerMessage, encode_peer_message},
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(state.config().max_payload_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState, remote_addr: SocketAddr) {
    let conn_id = Uuid::new_v4();
    if let Err(error) = state.relay().try_claim().await {
        warn!("rejecting browser agent conn={conn_id} remote={remote_addr}: {error}");
        let refusal = PeerMessage::Error {
            message: error.to_string(),
        };
        if let Ok(text) = encode_peer_message(&refusal) {
            let _ = socket.send(Message::Text(text.into())).await;
        }
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    info!("browser agent connected conn={conn_id} remote={remote_addr}");
    let max_payload_bytes = state.config().max_payload_bytes;
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<PeerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match encode_peer_message(&message) {
                Ok(text) => text,
                Err(error) => {
                    error!("failed to serialize peer message: {error}");
                    continue;
                }
            };
            if let Err(error) = sink.send(Message::Text(text.into())).await {
                debug!("peer socket send failed: {error}");
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let reader = tokio::spawn(async move {
        while let Some(next) = stream.next().await {
            let message = match next {
                Ok(message) => message,
                Err(error) => {
                    warn!("peer socket receive failed conn={conn_id}: {error}");
                    break;
                }
            };
            if matches!(message, Message::Close(_)) {
                break;
            }
            match message_to_text(message, max_payload_bytes) {
                Ok(Some(text)) => {
                    if inbound_tx.send(text).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(shape) => {
                    warn!("dropping peer frame conn={conn_id}: {}", shape.message);
                }
            }
        }
    });

    let link = PeerLink {
        inbound: inbound_rx,
        outbound: outbound_tx,
    };
    let _ = peer_session::run(&state, link, PeerRole::Server).await;

    reader.abort();
    let _ = writer.await;
    debug!("browser agent connection closed conn={conn_id} remote={remote_addr}");
}

fn message_to_text(message: Message, max_payload_bytes: usize) -> Result<Option<String>, ErrorShape> {
    match message {
        Message::Text(text) => {
            if text.len() > max_payload_bytes {
                return Err(oversized(text.len(), max_payload_bytes));
            }
            Ok(Some(text.as_str().to_owned()))
        }
        Message::Binary(bytes) => {
            if bytes.len() > max_payload_bytes {
                return Err(oversized(bytes.len(), max_payload_bytes));
            }
            let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                ErrorShape::new(
                    ERROR_INVALID_REQUEST,
                    "binary websocket frames must contain UTF-8",
                )
            })?;
            Ok(Some(text))
        }
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
    }
}

fn oversized(len: usize, max_payload_bytes: usize) -> ErrorShape {
    ErrorShape::new(
        ERROR_INVALID_REQUEST,
        format!("payload exceeds maxPayload ({len} > {max_payload_bytes})"),
    )
}
