use std::{net::SocketAddr, time::Duration};

use tokio::{net::TcpStream, time::timeout};
use tracing::debug;

use crate::domain::models::PeerRole;

/// Connect-then-close check of the peer port. A live listener means another
/// relay already serves the browser agent, so this process joins it as a client.
pub async fn probe(addr: SocketAddr, deadline: Duration) -> PeerRole {
    match timeout(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            debug!("peer port {addr} is taken; joining as client");
            PeerRole::Client
        }
        Ok(Err(error)) => {
            debug!("peer port {addr} is free ({error}); serving");
            PeerRole::Server
        }
        Err(_) => {
            debug!("probe of {addr} timed out; serving");
            PeerRole::Server
        }
    }
}
