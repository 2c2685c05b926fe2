use serde_json::json;
use tracing::{debug, warn};

use crate::{
    application::state::SharedState,
    protocol::{
        ERROR_METHOD_NOT_FOUND, ErrorShape, RpcRequest, RpcResponse, response_error, response_ok,
    },
    rpc::methods,
};

/// Routes one request line. Notifications never produce a response, even when
/// the method is unknown.
pub async fn dispatch_request(state: &SharedState, request: &RpcRequest) -> Option<RpcResponse> {
    debug!("rpc request method={}", request.method);

    let result = match request.method.as_str() {
        "initialize" => methods::initialize::handle(state, request.params.as_ref()).await,
        "notifications/initialized" | "initialized" => Ok(json!({})),
        "ping" => Ok(json!({})),
        "tools/list" => methods::tools::handle_list(request.params.as_ref()),
        "tools/call" => methods::tools::handle_call(state, request.params.as_ref()).await,
        other => Err(ErrorShape::new(
            ERROR_METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        )),
    };

    let Some(id) = request.id.clone() else {
        if let Err(error) = &result {
            debug!(
                "notification method={} failed: {}",
                request.method, error.message
            );
        }
        return None;
    };

    Some(match result {
        Ok(payload) => response_ok(id, payload),
        Err(error) => {
            warn!("rpc error method={} code={}", request.method, error.code);
            response_error(id, error)
        }
    })
}
