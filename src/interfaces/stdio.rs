use serde::Serialize;
use serde_json::json;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, error, warn};

use crate::{
    application::state::SharedState,
    domain::error::RelayError,
    protocol::{extract_request_id, notification, parse_request_line, response_error},
    rpc::dispatcher::dispatch_request,
};

pub const PEER_STATUS_NOTIFICATION: &str = "notifications/peer_status";

/// Serves line-delimited requests from `reader` until EOF.
///
/// Each request runs on its own task so a slow `tools/call` never blocks the
/// reader; every outbound line goes through one writer task.
pub async fn serve<R, W>(state: &SharedState, reader: R, writer: W) -> Result<(), RelayError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (lines_tx, lines_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_lines(writer, lines_rx));
    let status_task = tokio::spawn(forward_peer_status(state.clone(), lines_tx.clone()));

    let mut in_flight = JoinSet::new();
    let mut lines = reader.lines();
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(error) => {
                break Err(RelayError::TransportParse(format!(
                    "failed to read input: {error}"
                )));
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match parse_request_line(line) {
            Ok(request) => request,
            Err(shape) => {
                warn!("dropping malformed request line: {}", shape.message);
                if let Some(id) = extract_request_id(line) {
                    push_line(&lines_tx, &response_error(id, shape));
                }
                continue;
            }
        };

        let state = state.clone();
        let lines_tx = lines_tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = dispatch_request(&state, &request).await {
                push_line(&lines_tx, &response);
            }
        });

        while let Some(joined) = in_flight.try_join_next() {
            if let Err(error) = joined {
                error!("request task failed: {error}");
            }
        }
    };

    while let Some(joined) = in_flight.join_next().await {
        if let Err(error) = joined {
            error!("request task failed: {error}");
        }
    }

    status_task.abort();
    drop(lines_tx);
    if let Err(error) = writer_task.await {
        error!("stdout writer task failed: {error}");
    }
    debug!("input closed");
    read_result
}

fn push_line<T: Serialize>(lines: &mpsc::UnboundedSender<String>, frame: &T) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            let _ = lines.send(text);
        }
        Err(error) => error!("failed to serialize output frame: {error}"),
    }
}

async fn write_lines<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            error!("failed to write output line: {error}");
            break;
        }
        if let Err(error) = writer.flush().await {
            error!("failed to flush output: {error}");
            break;
        }
    }
}

/// Emits a notification on every peer-state change so the client sees
/// connect and disconnect without polling.
async fn forward_peer_status(state: SharedState, lines: mpsc::UnboundedSender<String>) {
    let mut changes = state.relay().subscribe();
    changes.mark_unchanged();
    while changes.changed().await.is_ok() {
        let current = *changes.borrow_and_update();
        let frame = notification(
            PEER_STATUS_NOTIFICATION,
            Some(json!({
                "seq": state.next_message_id(),
                "state": current,
                "role": state.peer_role().await,
            })),
        );
        push_line(&lines, &frame);
    }
}
