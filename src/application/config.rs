use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Deserialize;

use crate::relay::RelayTimings;

pub const DEFAULT_PORT: u16 = 18792;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 20_000;
pub const MIN_PING_INTERVAL_MS: u64 = 10_000;
pub const MAX_PING_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_INTER_CALL_DELAY_MS: u64 = 50;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_REGISTER_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tabrelay-core",
    version,
    about = "Tabrelay Core (stdio tool-call relay for an in-browser automation agent)"
)]
pub struct Args {
    #[arg(long, env = "TABRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TABRELAY_HOST")]
    pub host: Option<IpAddr>,

    #[arg(long, env = "TABRELAY_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "TABRELAY_AUTO_RECONNECT")]
    pub auto_reconnect: Option<bool>,

    #[arg(long, env = "TABRELAY_PING_INTERVAL_MS")]
    pub ping_interval_ms: Option<u64>,

    #[arg(long, env = "TABRELAY_CALL_TIMEOUT_MS")]
    pub call_timeout_ms: Option<u64>,

    #[arg(long, env = "TABRELAY_INTER_CALL_DELAY_MS")]
    pub inter_call_delay_ms: Option<u64>,

    #[arg(long, env = "TABRELAY_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long, env = "TABRELAY_REGISTER_TIMEOUT_MS")]
    pub register_timeout_ms: Option<u64>,

    #[arg(long, env = "TABRELAY_RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, env = "TABRELAY_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    #[arg(long, env = "TABRELAY_PEER_TOKEN")]
    pub peer_token: Option<String>,

    #[arg(long, env = "TABRELAY_MAX_PAYLOAD_BYTES")]
    pub max_payload_bytes: Option<usize>,

    #[arg(long, env = "TABRELAY_RUNTIME_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub runtime_version: String,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "TABRELAY_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

/// `[relay]` table of the optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayFileSection {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub auto_reconnect: Option<bool>,
    pub ping_interval_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub inter_call_delay_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub register_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub peer_token: Option<String>,
    pub max_payload_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub relay: RelayFileSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
        Self::parse(&text).map_err(|error| format!("invalid {}: {error}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str::<Self>(text).map_err(|error| error.to_string())
    }
}

/// Peer-channel knobs that the handshake may still adjust before the channel starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    pub auto_reconnect: bool,
    pub ping_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: IpAddr,
    pub port: u16,
    pub peer: PeerSettings,
    pub call_timeout: Duration,
    pub inter_call_delay: Duration,
    pub probe_timeout: Duration,
    pub register_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub peer_token: Option<String>,
    pub max_payload_bytes: usize,
    pub runtime_version: String,
    pub log_filter: String,
    pub json_logs: bool,
}

impl RuntimeConfig {
    pub fn from_args(args: Args) -> Result<Self, String> {
        let file = match args.config.as_deref() {
            Some(path) => FileConfig::load(path)?.relay,
            None => RelayFileSection::default(),
        };

        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err("port must be greater than 0".to_owned());
        }

        let ping_interval_ms = args
            .ping_interval_ms
            .or(file.ping_interval_ms)
            .unwrap_or(DEFAULT_PING_INTERVAL_MS);
        if !(MIN_PING_INTERVAL_MS..=MAX_PING_INTERVAL_MS).contains(&ping_interval_ms) {
            return Err(format!(
                "ping_interval_ms must be between {MIN_PING_INTERVAL_MS} and {MAX_PING_INTERVAL_MS}"
            ));
        }

        let call_timeout_ms = args
            .call_timeout_ms
            .or(file.call_timeout_ms)
            .unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
        if call_timeout_ms == 0 {
            return Err("call_timeout_ms must be greater than 0".to_owned());
        }

        let probe_timeout_ms = args
            .probe_timeout_ms
            .or(file.probe_timeout_ms)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS);
        if probe_timeout_ms == 0 {
            return Err("probe_timeout_ms must be greater than 0".to_owned());
        }

        let register_timeout_ms = args
            .register_timeout_ms
            .or(file.register_timeout_ms)
            .unwrap_or(DEFAULT_REGISTER_TIMEOUT_MS);
        if register_timeout_ms == 0 {
            return Err("register_timeout_ms must be greater than 0".to_owned());
        }

        let max_payload_bytes = args
            .max_payload_bytes
            .or(file.max_payload_bytes)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);
        if max_payload_bytes == 0 {
            return Err("max_payload_bytes must be greater than 0".to_owned());
        }

        Ok(Self {
            host: args
                .host
                .or(file.host)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port,
            peer: PeerSettings {
                auto_reconnect: args.auto_reconnect.or(file.auto_reconnect).unwrap_or(true),
                ping_interval: Duration::from_millis(ping_interval_ms),
            },
            call_timeout: Duration::from_millis(call_timeout_ms),
            inter_call_delay: Duration::from_millis(
                args.inter_call_delay_ms
                    .or(file.inter_call_delay_ms)
                    .unwrap_or(DEFAULT_INTER_CALL_DELAY_MS),
            ),
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            register_timeout: Duration::from_millis(register_timeout_ms),
            reconnect_delay: Duration::from_millis(
                args.reconnect_delay_ms
                    .or(file.reconnect_delay_ms)
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            max_reconnect_attempts: args
                .max_reconnect_attempts
                .or(file.max_reconnect_attempts)
                .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            peer_token: normalize_secret(args.peer_token.or(file.peer_token)),
            max_payload_bytes,
            runtime_version: args.runtime_version,
            log_filter: args.log_filter,
            json_logs: args.json_logs,
        })
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub fn relay_timings(&self) -> RelayTimings {
        RelayTimings {
            call_timeout: self.call_timeout,
            inter_call_delay: self.inter_call_delay,
        }
    }

    #[must_use]
    pub fn for_test(host: IpAddr, port: u16) -> Self {
        Self {
            host,
            port,
            peer: PeerSettings {
                auto_reconnect: false,
                ping_interval: Duration::from_millis(200),
            },
            call_timeout: Duration::from_millis(1_500),
            inter_call_delay: Duration::from_millis(5),
            probe_timeout: Duration::from_millis(200),
            register_timeout: Duration::from_millis(1_000),
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_attempts: 2,
            peer_token: None,
            max_payload_bytes: 1024 * 1024,
            runtime_version: "test".to_owned(),
            log_filter: "warn".to_owned(),
            json_logs: false,
        }
    }
}

/// Clamps a handshake-provided ping interval into the supported range.
#[must_use]
pub fn clamp_ping_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_PING_INTERVAL_MS, MAX_PING_INTERVAL_MS))
}

fn normalize_secret(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}
