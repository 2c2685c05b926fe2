use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tabrelay_core::{
    agent::{
        error::AgentError,
        host::{BrowserHost, DebuggerTransport, TabInfo},
    },
    application::{config::RuntimeConfig, startup, state::SharedState},
    domain::models::{CorrelationId, TabId},
    protocol::{PeerMessage, decode_peer_message, encode_peer_message},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A relay served over in-memory stdio with a pre-bound peer listener.
pub(crate) struct RelayHandle {
    pub(crate) addr: SocketAddr,
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    notifications: Vec<Value>,
    next_id: u64,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    pub(crate) async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = timeout(READ_TIMEOUT, self.join).await;
    }

    pub(crate) async fn send_line(&mut self, line: &str) {
        self.input
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("input line should write");
    }

    /// Writes a request and returns its id without waiting for the answer.
    pub(crate) async fn send_request(&mut self, method: &str, params: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send_line(&frame.to_string()).await;
        id
    }

    /// Reads output lines until the response for `id`, keeping notifications aside.
    pub(crate) async fn read_response(&mut self, id: u64) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame.get("id") == Some(&json!(id)) {
                return frame;
            }
            if frame.get("id").is_none() {
                self.notifications.push(frame);
            }
        }
    }

    pub(crate) async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.send_request(method, params).await;
        self.read_response(id).await
    }

    pub(crate) async fn initialize(&mut self) -> Value {
        let response = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "clientInfo": { "name": "integration", "version": "0.0.1" }
                }),
            )
            .await;
        assert!(response.get("error").is_none(), "initialize failed: {response}");
        response
    }

    pub(crate) async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        let response = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;
        tool_value(&response)
    }

    pub(crate) async fn next_frame(&mut self) -> Value {
        let line = timeout(READ_TIMEOUT, self.output.next_line())
            .await
            .expect("relay should answer in time")
            .expect("output should stay readable")
            .expect("output should stay open");
        serde_json::from_str(&line).expect("output lines are json")
    }

    /// Peer-status notifications seen so far while waiting on responses.
    pub(crate) fn notifications(&self) -> &[Value] {
        &self.notifications
    }
}

/// Decodes the tool value carried in a `tools/call` response.
pub(crate) fn tool_value(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("tool result text expected: {response}"));
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

pub(crate) async fn spawn_relay() -> RelayHandle {
    spawn_relay_with(|_: &mut RuntimeConfig| {}).await
}

pub(crate) async fn spawn_relay_with(configure: impl FnOnce(&mut RuntimeConfig)) -> RelayHandle {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener should expose local addr");

    let mut config = RuntimeConfig::for_test(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    configure(&mut config);
    spawn_with_state(addr, SharedState::with_listener(config, listener))
}

/// Runs a relay that negotiates its own role against `addr`.
pub(crate) fn spawn_relay_probing(addr: SocketAddr) -> RelayHandle {
    let config = RuntimeConfig::for_test(addr.ip(), addr.port());
    spawn_with_state(addr, SharedState::new(config))
}

fn spawn_with_state(addr: SocketAddr, state: SharedState) -> RelayHandle {
    let (input, relay_input) = tokio::io::duplex(64 * 1024);
    let (relay_output, output) = tokio::io::duplex(64 * 1024);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        let _ = startup::run_with_io(state, BufReader::new(relay_input), relay_output, async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    RelayHandle {
        addr,
        input,
        output: BufReader::new(output).lines(),
        notifications: Vec::new(),
        next_id: 1,
        shutdown: Some(shutdown_tx),
        join,
    }
}

pub(crate) async fn connect_peer(addr: SocketAddr) -> WsStream {
    let (socket, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket should connect");
    socket
}

pub(crate) async fn send_peer(ws: &mut WsStream, message: &PeerMessage) {
    let text = encode_peer_message(message).expect("peer message encodes");
    ws.send(Message::Text(text.into()))
        .await
        .expect("peer message should send");
}

/// Next peer message, answering relay pings on the way. `None` once closed.
pub(crate) async fn recv_peer(ws: &mut WsStream) -> Option<PeerMessage> {
    loop {
        let next = timeout(READ_TIMEOUT, ws.next())
            .await
            .expect("peer message should arrive in time")?;
        let text = match next {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        let message = decode_peer_message(text.as_str()).expect("relay sends valid peer messages");
        if message == PeerMessage::Ping {
            send_peer(ws, &PeerMessage::Pong).await;
            continue;
        }
        return Some(message);
    }
}

/// How a scripted agent answers one tool call.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Now(Value),
    After(Duration, Value),
    Never,
}

/// A registered stand-in for the browser agent that answers pings and replies
/// to tool calls according to a script.
pub(crate) struct ScriptedAgent {
    pub(crate) calls: mpsc::UnboundedReceiver<(CorrelationId, String, Value)>,
    disconnect: CancellationToken,
    join: JoinHandle<()>,
}

impl ScriptedAgent {
    /// Closes the socket and waits for the agent task to finish.
    pub(crate) async fn disconnect(self) {
        self.disconnect.cancel();
        let _ = timeout(READ_TIMEOUT, self.join).await;
    }
}

/// Registers an agent over an outbound socket (relay in server role).
pub(crate) async fn register_agent(
    addr: SocketAddr,
    script: fn(&str, &Value) -> Reply,
) -> ScriptedAgent {
    let mut ws = connect_peer(addr).await;
    send_peer(
        &mut ws,
        &PeerMessage::Register {
            client: "scripted-agent".to_owned(),
            token: None,
        },
    )
    .await;
    assert_eq!(recv_peer(&mut ws).await, Some(PeerMessage::Registered));
    run_scripted(ws, script)
}

pub(crate) fn run_scripted<S>(ws: WebSocketStream<S>, script: fn(&str, &Value) -> Reply) -> ScriptedAgent
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let disconnect = CancellationToken::new();
    let stop = disconnect.clone();

    let join = tokio::spawn(async move {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<PeerMessage>();
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                Some(message) = out_rx.recv() => {
                    let text = encode_peer_message(&message).expect("peer message encodes");
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                next = stream.next() => {
                    let Some(Ok(Message::Text(text))) = next else {
                        break;
                    };
                    match decode_peer_message(text.as_str()) {
                        Ok(PeerMessage::Ping) => {
                            let _ = out_tx.send(PeerMessage::Pong);
                        }
                        Ok(PeerMessage::ToolCall { id, tool, params }) => {
                            let reply = script(&tool, &params);
                            let _ = calls_tx.send((id, tool, params));
                            let out_tx = out_tx.clone();
                            tokio::spawn(async move {
                                let result = match reply {
                                    Reply::Now(result) => result,
                                    Reply::After(delay, result) => {
                                        sleep(delay).await;
                                        result
                                    }
                                    Reply::Never => return,
                                };
                                let _ = out_tx.send(PeerMessage::ToolResult { id, result });
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    ScriptedAgent {
        calls,
        disconnect,
        join,
    }
}

/// Echoes `arguments` for `echo`, delays `slow`, and never answers `hang`.
pub(crate) fn echo_script(tool: &str, params: &Value) -> Reply {
    match tool {
        "echo" => Reply::Now(params.clone()),
        "slow" => Reply::After(Duration::from_secs(2), json!({ "late": true })),
        "hang" => Reply::Never,
        other => Reply::Now(json!({ "error": format!("unknown tool {other}") })),
    }
}

/// Scripted browser for end-to-end agent runs. Tab 7 is active.
#[derive(Default)]
pub(crate) struct FakeBrowser {
    commands: Mutex<Vec<(TabId, String)>>,
    attached: Mutex<HashSet<TabId>>,
    attaches: Mutex<HashMap<TabId, usize>>,
}

impl FakeBrowser {
    pub(crate) fn command_count(&self, tab_id: TabId, method: &str) -> usize {
        self.commands
            .lock()
            .expect("commands lock")
            .iter()
            .filter(|(tab, name)| *tab == tab_id && name == method)
            .count()
    }

    pub(crate) fn attach_count(&self, tab_id: TabId) -> usize {
        self.attaches
            .lock()
            .expect("attaches lock")
            .get(&tab_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl DebuggerTransport for FakeBrowser {
    async fn attach(&self, tab_id: TabId) -> Result<(), AgentError> {
        self.attached.lock().expect("attached lock").insert(tab_id);
        *self
            .attaches
            .lock()
            .expect("attaches lock")
            .entry(tab_id)
            .or_default() += 1;
        Ok(())
    }

    async fn detach(&self, tab_id: TabId) -> Result<(), AgentError> {
        self.attached.lock().expect("attached lock").remove(&tab_id);
        Ok(())
    }

    async fn send_command(
        &self,
        tab_id: TabId,
        method: &str,
        _params: Value,
    ) -> Result<Value, AgentError> {
        self.commands
            .lock()
            .expect("commands lock")
            .push((tab_id, method.to_owned()));
        Ok(json!({ "method": method }))
    }
}

#[async_trait]
impl BrowserHost for FakeBrowser {
    async fn active_tab(&self) -> Option<TabId> {
        Some(7)
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, AgentError> {
        Ok(vec![TabInfo {
            id: 7,
            url: "https://example.test/".to_owned(),
            title: "Example".to_owned(),
            active: true,
        }])
    }

    async fn open_extension_page(&self, _extension_id: &str, _page: &str) -> Result<TabId, AgentError> {
        Ok(100)
    }

    async fn close_tab(&self, _tab_id: TabId) -> Result<(), AgentError> {
        Ok(())
    }

    async fn extension_state(&self, _extension_id: &str) -> Result<Map<String, Value>, AgentError> {
        Ok(Map::new())
    }

    async fn send_to_content_script(
        &self,
        tab_id: TabId,
        _tool: &str,
        _params: Value,
    ) -> Result<Value, AgentError> {
        Err(AgentError::ContentScriptUnreachable(tab_id))
    }
}
