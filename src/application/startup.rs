use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    application::{
        config::{Args, RuntimeConfig},
        state::SharedState,
    },
    domain::{error::RelayError, models::PeerConnectionState},
    interfaces::stdio,
};

pub async fn run(args: Args) -> Result<(), RelayError> {
    let config = RuntimeConfig::from_args(args)
        .map_err(|error| RelayError::InvalidRequest(format!("configuration error: {error}")))?;

    init_logging(&config.log_filter, config.json_logs)?;
    let state = SharedState::new(config);

    run_with_io(
        state,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await
}

/// Serves the transport front over the given streams until input EOF or
/// `shutdown`. With a registered peer, EOF waits for the peer to drop first.
pub async fn run_with_io<R, W>(
    state: SharedState,
    reader: R,
    writer: W,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), RelayError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!(
        "starting tabrelay-core peer_addr={} auto_reconnect={} version={}",
        state.config().peer_addr(),
        state.config().peer.auto_reconnect,
        state.config().runtime_version,
    );

    tokio::pin!(shutdown);
    let served = tokio::select! {
        result = stdio::serve(&state, reader, writer) => Some(result),
        () = &mut shutdown => None,
    };

    if matches!(served, Some(Ok(())))
        && state.relay().state() == PeerConnectionState::Registered
    {
        info!("input closed; waiting for the browser agent to disconnect");
        let mut changes = state.relay().subscribe();
        tokio::select! {
            _ = changes.wait_for(|current| *current != PeerConnectionState::Registered) => {}
            () = &mut shutdown => {}
        }
    }

    state.shutdown();
    info!("tabrelay-core stopped");
    served.unwrap_or(Ok(()))
}

fn init_logging(filter: &str, json_logs: bool) -> Result<(), RelayError> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries protocol frames; logs go to stderr.
    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json_logs {
        builder.json().try_init().map_err(|error| {
            RelayError::Unavailable(format!("failed to initialize logger: {error}"))
        })?;
    } else {
        builder.compact().try_init().map_err(|error| {
            RelayError::Unavailable(format!("failed to initialize logger: {error}"))
        })?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
