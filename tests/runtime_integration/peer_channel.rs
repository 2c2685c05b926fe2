use std::{net::Ipv4Addr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tabrelay_core::protocol::{PeerMessage, decode_peer_message, encode_peer_message};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use super::support::{
    connect_peer, echo_script, recv_peer, register_agent, run_scripted, send_peer, spawn_relay,
    spawn_relay_probing, spawn_relay_with, tool_value,
};

#[tokio::test]
async fn registered_agent_round_trips_tool_results() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let agent = register_agent(relay.addr, echo_script).await;

    let value = relay.call_tool("echo", json!({ "x": 1 })).await;
    assert_eq!(value, json!({ "x": 1 }));

    let value = relay.call_tool("echo", json!({ "x": 2 })).await;
    assert_eq!(value, json!({ "x": 2 }));

    agent.disconnect().await;
    relay.stop().await;
}

#[tokio::test]
async fn concurrent_calls_each_get_their_own_result() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let mut agent = register_agent(relay.addr, echo_script).await;

    let mut ids = Vec::new();
    for n in 1..=3 {
        let id = relay
            .send_request("tools/call", json!({ "name": "echo", "arguments": { "n": n } }))
            .await;
        ids.push((id, n));
    }
    for (id, n) in ids {
        let response = relay.read_response(id).await;
        assert_eq!(tool_value(&response), json!({ "n": n }));
    }

    let mut correlations = Vec::new();
    while let Ok((correlation, _, _)) = agent.calls.try_recv() {
        correlations.push(correlation);
    }
    correlations.dedup();
    assert_eq!(correlations.len(), 3);

    agent.disconnect().await;
    relay.stop().await;
}

#[tokio::test]
async fn late_result_after_timeout_is_discarded() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let agent = register_agent(relay.addr, echo_script).await;

    let value = relay.call_tool("slow", json!({})).await;
    assert_eq!(value["error"], "Timeout");

    tokio::time::sleep(Duration::from_millis(700)).await;
    let value = relay.call_tool("echo", json!({ "after": "timeout" })).await;
    assert_eq!(value, json!({ "after": "timeout" }));

    agent.disconnect().await;
    relay.stop().await;
}

#[tokio::test]
async fn disconnect_resolves_in_flight_calls() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let mut agent = register_agent(relay.addr, echo_script).await;

    let id = relay
        .send_request("tools/call", json!({ "name": "hang", "arguments": {} }))
        .await;
    let (_, tool, _) = agent.calls.recv().await.expect("agent sees the call");
    assert_eq!(tool, "hang");
    agent.disconnect().await;

    let response = relay.read_response(id).await;
    assert_eq!(response["result"]["isError"], true);
    assert!(
        response["result"]["content"][0]["text"]
            .as_str()
            .is_some_and(|text| text.contains("Connection closed"))
    );

    relay.stop().await;
}

#[tokio::test]
async fn second_peer_is_refused_while_one_is_active() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let agent = register_agent(relay.addr, echo_script).await;

    let mut intruder = connect_peer(relay.addr).await;
    match recv_peer(&mut intruder).await {
        Some(PeerMessage::Error { message }) => assert!(message.contains("already active")),
        other => panic!("expected refusal, got {other:?}"),
    }
    assert_eq!(recv_peer(&mut intruder).await, None);

    let value = relay.call_tool("echo", json!({ "still": "served" })).await;
    assert_eq!(value, json!({ "still": "served" }));

    agent.disconnect().await;
    relay.stop().await;
}

#[tokio::test]
async fn peer_with_wrong_token_is_refused() {
    let mut relay = spawn_relay_with(|config| config.peer_token = Some("s3cret".to_owned())).await;
    relay.initialize().await;

    let mut peer = connect_peer(relay.addr).await;
    send_peer(
        &mut peer,
        &PeerMessage::Register {
            client: "impostor".to_owned(),
            token: Some("wrong".to_owned()),
        },
    )
    .await;
    match recv_peer(&mut peer).await {
        Some(PeerMessage::Error { message }) => assert!(message.contains("invalid peer token")),
        other => panic!("expected auth error, got {other:?}"),
    }
    assert_eq!(recv_peer(&mut peer).await, None);

    let value = relay.call_tool("echo", json!({})).await;
    assert_eq!(value["error"], "Not connected");

    relay.stop().await;
}

#[tokio::test]
async fn peer_status_notifications_follow_the_channel() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let agent = register_agent(relay.addr, echo_script).await;
    relay.call_tool("echo", json!({})).await;

    let states = relay
        .notifications()
        .iter()
        .filter(|frame| frame["method"] == "notifications/peer_status")
        .filter_map(|frame| frame["params"]["state"].as_str())
        .collect::<Vec<_>>();
    assert!(states.contains(&"registered"), "states: {states:?}");

    agent.disconnect().await;
    relay.stop().await;
}

#[tokio::test]
async fn occupied_port_makes_the_relay_dial_out() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr");

    let agent = tokio::spawn(async move {
        // The first connection is the role probe; it closes without a handshake.
        loop {
            let (stream, _) = listener.accept().await.expect("accept");
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                continue;
            };
            let client = match decode_peer_message(text.as_str()).expect("register message") {
                PeerMessage::Register { client, .. } => client,
                other => panic!("expected register, got {other:?}"),
            };
            let registered = encode_peer_message(&PeerMessage::Registered).expect("encode");
            ws.send(Message::Text(registered.into()))
                .await
                .expect("registered should send");
            return (client, run_scripted(ws, echo_script));
        }
    });

    let mut relay = spawn_relay_probing(addr);
    relay.initialize().await;
    let (client, scripted) = tokio::time::timeout(Duration::from_secs(10), agent)
        .await
        .expect("relay should dial the listener")
        .expect("agent task");
    assert_eq!(client, "tabrelay-core");

    let value = relay.call_tool("echo", json!({ "role": "client" })).await;
    assert_eq!(value, json!({ "role": "client" }));

    scripted.disconnect().await;
    relay.stop().await;
}
