use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:18792/";

/// Browser-agent settings. Every field has a default so a partial TOML table
/// (or none at all) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub relay_url: String,
    pub client_name: String,
    pub token: Option<String>,
    /// Initial state of the automation permission; toggled at runtime by the host UI.
    pub automation_enabled: bool,
    pub auto_reconnect: bool,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    /// Wait after opening a page before attaching to it.
    pub page_settle_ms: u64,
    /// Default observation window of an extension error capture.
    pub capture_window_ms: u64,
    /// Upper bound on a requested `waitMs`. Stays below the relay call timeout
    /// so a capture still reports before the caller gives up on it.
    pub max_capture_window_ms: u64,
    pub console_limit: usize,
    pub network_limit: usize,
    pub animation_limit: usize,
    pub mutation_limit: usize,
    pub extension_store_limit: usize,
    pub mutation_max_changes: u32,
    pub mutation_window_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_owned(),
            client_name: "tabrelay-agent".to_owned(),
            token: None,
            automation_enabled: false,
            auto_reconnect: true,
            reconnect_delay_ms: 2_000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 5_000,
            page_settle_ms: 500,
            capture_window_ms: 3_000,
            max_capture_window_ms: 20_000,
            console_limit: 500,
            network_limit: 500,
            animation_limit: 100,
            mutation_limit: 200,
            extension_store_limit: 500,
            mutation_max_changes: 5,
            mutation_window_ms: 1_000,
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str::<Self>(text).map_err(|error| format!("invalid agent config: {error}"))
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }

    #[must_use]
    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window_ms.min(self.max_capture_window_ms))
    }

    /// Window for one capture: the requested length, or the default, clamped
    /// to `max_capture_window_ms`.
    #[must_use]
    pub fn capture_window_for(&self, requested_ms: Option<u64>) -> Duration {
        requested_ms.map_or_else(
            || self.capture_window(),
            |ms| Duration::from_millis(ms.min(self.max_capture_window_ms)),
        )
    }

    #[must_use]
    pub fn mutation_window(&self) -> Duration {
        Duration::from_millis(self.mutation_window_ms)
    }

    #[must_use]
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            console: self.console_limit.max(1),
            network: self.network_limit.max(1),
            animations: self.animation_limit.max(1),
            mutations: self.mutation_limit.max(1),
            extension: self.extension_store_limit.max(1),
        }
    }
}

/// Ring-buffer bounds for the capture stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub console: usize,
    pub network: usize,
    pub animations: usize,
    pub mutations: usize,
    pub extension: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        AgentConfig::default().store_limits()
    }
}
