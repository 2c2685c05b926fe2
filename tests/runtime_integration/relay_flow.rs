use serde_json::json;
use tabrelay_core::protocol::ERROR_METHOD_NOT_FOUND;

use super::support::{spawn_relay, tool_value};

#[tokio::test]
async fn initialize_advertises_tools_capability() {
    let mut relay = spawn_relay().await;

    let response = relay.initialize().await;
    assert_eq!(response["result"]["serverInfo"]["name"], "tabrelay-core");
    assert!(response["result"]["capabilities"]["tools"].is_object());

    let listed = relay.request("tools/list", json!({})).await;
    let names = listed["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect::<Vec<_>>();
    assert!(names.contains(&"debugger_attach"));
    assert!(names.contains(&"capture_extension_errors"));

    relay.stop().await;
}

#[tokio::test]
async fn tool_call_without_peer_reports_not_connected() {
    let mut relay = spawn_relay().await;

    let response = relay
        .request("tools/call", json!({ "name": "list_tabs", "arguments": {} }))
        .await;
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(tool_value(&response)["error"], "Not connected");

    relay.stop().await;
}

#[tokio::test]
async fn unknown_method_gets_method_not_found() {
    let mut relay = spawn_relay().await;

    let response = relay.request("resources/list", json!({})).await;
    assert_eq!(response["error"]["code"], ERROR_METHOD_NOT_FOUND);
    assert!(
        response["error"]["message"]
            .as_str()
            .is_some_and(|message| message.contains("resources/list"))
    );

    relay.stop().await;
}

#[tokio::test]
async fn malformed_and_blank_lines_do_not_stop_the_reader() {
    let mut relay = spawn_relay().await;

    relay.send_line("").await;
    relay.send_line("{ this is not json").await;
    relay
        .send_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;

    let response = relay.request("ping", json!({})).await;
    assert_eq!(response["result"], json!({}));

    relay.stop().await;
}

#[tokio::test]
async fn tools_call_without_name_is_invalid_params() {
    let mut relay = spawn_relay().await;

    let response = relay
        .request("tools/call", json!({ "arguments": {} }))
        .await;
    assert_eq!(response["error"]["code"], -32602);

    relay.stop().await;
}
