pub mod http;
pub mod peer_client;
pub mod peer_session;
pub mod probe;
pub mod stdio;
pub mod ws;
