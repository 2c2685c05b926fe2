use std::{sync::Arc, time::Duration};

use serde_json::json;
use tabrelay_core::{
    agent::{BrowserAgent, config::AgentConfig, dispatcher::ToolDispatcher},
    domain::models::LinkStatus,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::support::{FakeBrowser, RelayHandle, spawn_relay};

struct RunningAgent {
    browser: Arc<FakeBrowser>,
    dispatcher: Arc<ToolDispatcher>,
    shutdown: CancellationToken,
}

async fn start_agent(relay: &RelayHandle, automation_enabled: bool) -> RunningAgent {
    let browser = Arc::new(FakeBrowser::default());
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let config = AgentConfig {
        relay_url: format!("ws://{}/", relay.addr),
        automation_enabled,
        auto_reconnect: false,
        ..AgentConfig::default()
    };
    let agent = BrowserAgent::new(config, browser.clone(), browser.clone(), events_rx);
    let dispatcher = Arc::clone(agent.dispatcher());
    let mut status = agent.link().subscribe();

    let shutdown = CancellationToken::new();
    tokio::spawn(agent.run(shutdown.clone()));
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|current| *current == LinkStatus::Connected),
    )
    .await
    .expect("agent should register in time")
    .expect("status channel open");

    RunningAgent {
        browser,
        dispatcher,
        shutdown,
    }
}

#[tokio::test]
async fn attach_is_idempotent_and_domains_enable_once() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let running = start_agent(&relay, true).await;

    let first = relay.call_tool("debugger_attach", json!({ "tabId": 7 })).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["already"], false);
    let second = relay.call_tool("debugger_attach", json!({ "tabId": 7 })).await;
    assert_eq!(second["already"], true);
    assert_eq!(running.browser.attach_count(7), 1);

    for _ in 0..2 {
        let value = relay
            .call_tool(
                "cdp_command",
                json!({ "tabId": 7, "method": "Network.getCookies", "params": {} }),
            )
            .await;
        assert_eq!(value["result"]["method"], "Network.getCookies");
    }
    assert_eq!(running.browser.command_count(7, "Network.enable"), 1);
    assert_eq!(running.browser.command_count(7, "Network.getCookies"), 2);

    running.shutdown.cancel();
    relay.stop().await;
}

#[tokio::test]
async fn privileged_tools_wait_for_automation_permission() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let running = start_agent(&relay, false).await;

    let denied = relay.call_tool("debugger_attach", json!({})).await;
    assert_eq!(denied["error"], "Automation permission is disabled");
    assert_eq!(running.browser.attach_count(7), 0);

    let tabs = relay.call_tool("list_tabs", json!({})).await;
    assert_eq!(tabs["tabs"][0]["id"], 7);

    running.dispatcher.set_automation_enabled(true);
    let attached = relay.call_tool("debugger_attach", json!({})).await;
    assert_eq!(attached["tabId"], 7);
    assert_eq!(running.browser.attach_count(7), 1);

    running.shutdown.cancel();
    relay.stop().await;
}

#[tokio::test]
async fn unknown_tools_fall_through_to_the_content_script() {
    let mut relay = spawn_relay().await;
    relay.initialize().await;
    let running = start_agent(&relay, true).await;

    let value = relay.call_tool("highlight_element", json!({ "tabId": 7 })).await;
    assert_eq!(value["error"], "Content script unreachable in tab 7");

    running.shutdown.cancel();
    relay.stop().await;
}
