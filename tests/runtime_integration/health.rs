use std::time::Duration;

use serde_json::{Value, json};

use super::support::{echo_script, register_agent, spawn_relay};

async fn fetch_health(addr: std::net::SocketAddr) -> Value {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(response) = client.get(format!("http://{addr}/healthz")).send().await {
            assert!(response.status().is_success());
            return response.json().await.expect("health body is json");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("health endpoint never answered on {addr}");
}

#[tokio::test]
async fn health_reports_listening_relay_without_peer() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;

    let body = fetch_health(relay.addr).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["runtime"], "tabrelay-core");
    assert_eq!(body["peer"]["state"], "unconnected");
    assert_eq!(body["peer"]["role"], "server");
    assert_eq!(body["peer"]["link"], json!({ "status": "listening" }));
    assert_eq!(body["peer"]["connected"], false);

    relay.stop().await;
}

#[tokio::test]
async fn health_counts_calls_sent_to_the_agent() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let agent = register_agent(relay.addr, echo_script).await;

    relay.call_tool("echo", json!({ "n": 1 })).await;
    relay.call_tool("echo", json!({ "n": 2 })).await;

    let body = fetch_health(relay.addr).await;
    assert_eq!(body["peer"]["connected"], true);
    assert_eq!(body["callsSent"], 2);
    assert_eq!(body["pendingCalls"], 0);

    agent.disconnect().await;
    relay.stop().await;
}
