use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    application::{config::clamp_ping_interval, state::SharedState, supervisor},
    protocol::{
        ErrorShape, InitializeResult, PROTOCOL_VERSION, ServerCapabilities, ServerInfo,
        ToolsCapability,
    },
    rpc::methods::parse_optional_params,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: Option<String>,
    client_info: Option<ClientInfo>,
    relay: Option<RelayOverrides>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientInfo {
    name: Option<String>,
    version: Option<String>,
}

/// Per-session overrides a client may send with its handshake.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RelayOverrides {
    auto_reconnect: Option<bool>,
    ping_interval_ms: Option<u64>,
}

pub async fn handle(state: &SharedState, params: Option<&Value>) -> Result<Value, ErrorShape> {
    let params: InitializeParams = parse_optional_params("initialize", params)?;

    if let Some(client) = &params.client_info {
        info!(
            "client handshake name={} version={} protocol={}",
            client.name.as_deref().unwrap_or("unknown"),
            client.version.as_deref().unwrap_or("unknown"),
            params.protocol_version.as_deref().unwrap_or(PROTOCOL_VERSION),
        );
    }

    if let Some(overrides) = params.relay {
        let applied = state
            .update_peer_settings(|settings| {
                if let Some(auto_reconnect) = overrides.auto_reconnect {
                    settings.auto_reconnect = auto_reconnect;
                }
                if let Some(ping_interval_ms) = overrides.ping_interval_ms {
                    settings.ping_interval = clamp_ping_interval(ping_interval_ms);
                }
            })
            .await;
        if !applied {
            debug!("peer channel already running; handshake overrides ignored");
        }
    }

    supervisor::ensure_started(state);

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_owned(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability {
                list_changed: false,
            },
        },
        server_info: ServerInfo {
            name: "tabrelay-core".to_owned(),
            version: state.config().runtime_version.clone(),
        },
        instructions: Some(
            "Tools run inside the connected browser agent. Calls are serialized; \
             a result with an `error` field means the agent or the relay refused the call."
                .to_owned(),
        ),
    };

    Ok(serde_json::to_value(result).unwrap_or_default())
}
