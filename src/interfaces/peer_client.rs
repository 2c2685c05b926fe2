use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::{
    application::state::SharedState,
    domain::{
        error::RelayError,
        models::{LinkStatus, PeerRole},
    },
    interfaces::peer_session::{self, PeerLink},
    protocol::{PeerMessage, encode_peer_message},
};

/// Joins the listener that already owns the peer port and runs the channel
/// until it closes.
pub async fn connect_and_run(state: &SharedState) -> Result<(), RelayError> {
    state.relay().try_claim().await?;

    let url = format!("ws://{}/", state.config().peer_addr());
    let connected = timeout(state.config().register_timeout, connect_async(url.as_str())).await;
    let socket = match connected {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(error)) => {
            state.relay().peer_disconnected().await;
            return Err(RelayError::Unavailable(format!(
                "failed to connect to {url}: {error}"
            )));
        }
        Err(_) => {
            state.relay().peer_disconnected().await;
            return Err(RelayError::Unavailable(format!("connect to {url} timed out")));
        }
    };
    info!("connected to peer listener at {url}");
    state.set_link_status(LinkStatus::Connected).await;

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
                debug!("peer client send failed: {error}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(next) = stream.next().await {
            match next {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("dropping non UTF-8 binary peer frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => {
                    warn!("peer client receive failed: {error}");
                    break;
                }
            }
        }
    });

    let link = PeerLink {
        inbound: inbound_rx,
        outbound: outbound_tx,
    };
    let result = peer_session::run(state, link, PeerRole::Client).await;

    reader.abort();
    let _ = writer.await;
    result
}
