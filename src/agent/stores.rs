use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;

use crate::agent::config::StoreLimits;

#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Bounded FIFO. Pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest matching entry, searched from the back.
    pub fn find_latest_mut(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.entries.iter_mut().rev().find(|entry| predicate(entry))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.evicted = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Up to `limit` of the newest entries, oldest first.
    #[must_use]
    pub fn recent(&self, limit: Option<usize>) -> Vec<T> {
        let skip = limit.map_or(0, |limit| self.entries.len().saturating_sub(limit));
        self.entries.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn page(&self, limit: Option<usize>) -> LogPage<T> {
        LogPage {
            entries: self.recent(limit),
            evicted: self.evicted,
        }
    }
}

/// Newest entries of one log, with the count of older entries the bound
/// has already pushed out since the last clear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage<T> {
    pub entries: Vec<T>,
    pub evicted: u64,
}

impl<T> Default for LogPage<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            evicted: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleSource {
    Console,
    Exception,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub timestamp: i64,
    pub source: ConsoleSource,
    pub level: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Value>,
}

impl ConsoleEntry {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.source == ConsoleSource::Exception || self.level == "error"
    }

    /// `Runtime.consoleAPICalled`
    #[must_use]
    pub fn from_console_api(params: &Value) -> Self {
        let level = match params["type"].as_str().unwrap_or("log") {
            "warning" => "warn",
            other => other,
        };
        let text = params["args"]
            .as_array()
            .map(|args| args.iter().map(remote_object_text).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let frame = &params["stackTrace"]["callFrames"][0];

        Self {
            timestamp: now_ms(),
            source: ConsoleSource::Console,
            level: level.to_owned(),
            text,
            url: frame["url"].as_str().map(str::to_owned),
            line: frame["lineNumber"].as_i64(),
            stack: None,
        }
    }

    /// `Runtime.exceptionThrown`
    #[must_use]
    pub fn from_exception(params: &Value) -> Self {
        let details = &params["exceptionDetails"];
        let text = details["exception"]["description"]
            .as_str()
            .or_else(|| details["text"].as_str())
            .unwrap_or("Uncaught exception");

        Self {
            timestamp: now_ms(),
            source: ConsoleSource::Exception,
            level: "error".to_owned(),
            text: text.to_owned(),
            url: details["url"].as_str().map(str::to_owned),
            line: details["lineNumber"].as_i64(),
            stack: details
                .get("stackTrace")
                .filter(|stack| !stack.is_null())
                .cloned(),
        }
    }

    /// `Log.entryAdded`
    #[must_use]
    pub fn from_log_entry(params: &Value) -> Self {
        let entry = &params["entry"];
        let level = match entry["level"].as_str().unwrap_or("info") {
            "warning" => "warn",
            "verbose" => "debug",
            other => other,
        };

        Self {
            timestamp: now_ms(),
            source: ConsoleSource::Log,
            level: level.to_owned(),
            text: entry["text"].as_str().unwrap_or_default().to_owned(),
            url: entry["url"].as_str().map(str::to_owned),
            line: entry["lineNumber"].as_i64(),
            stack: None,
        }
    }

    /// Synthetic entry for a global error marker surfaced by the capture probe.
    #[must_use]
    pub fn from_marker(text: String) -> Self {
        Self {
            timestamp: now_ms(),
            source: ConsoleSource::Exception,
            level: "error".to_owned(),
            text,
            url: None,
            line: None,
            stack: None,
        }
    }
}

fn remote_object_text(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(text)) => text.clone(),
        Some(value) if !value.is_null() => value.to_string(),
        _ => arg["description"]
            .as_str()
            .or_else(|| arg["type"].as_str())
            .unwrap_or_default()
            .to_owned(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_data_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnimationPhase {
    Created,
    Started,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationEntry {
    pub id: String,
    pub phase: AnimationPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEntry {
    pub timestamp: i64,
    pub node_id: i64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-tab capture buffers. Purged when the tab closes.
#[derive(Debug, Clone)]
pub struct TabStores {
    pub console: RingBuffer<ConsoleEntry>,
    pub network: RingBuffer<NetworkEntry>,
    pub animations: RingBuffer<AnimationEntry>,
    pub mutations: RingBuffer<MutationEntry>,
}

impl TabStores {
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            console: RingBuffer::new(limits.console),
            network: RingBuffer::new(limits.network),
            animations: RingBuffer::new(limits.animations),
            mutations: RingBuffer::new(limits.mutations),
        }
    }

    pub fn clear(&mut self) {
        self.console.clear();
        self.network.clear();
        self.animations.clear();
        self.mutations.clear();
    }

    /// Applies one `Network.*` event, correlating by `requestId`.
    pub fn record_network(&mut self, method: &str, params: &Value) {
        let Some(request_id) = params["requestId"].as_str() else {
            return;
        };

        if method == "Network.requestWillBeSent" {
            let request = &params["request"];
            // Redirects reuse the request id; each hop is its own entry.
            self.network.push(NetworkEntry {
                request_id: request_id.to_owned(),
                url: request["url"].as_str().unwrap_or_default().to_owned(),
                method: request["method"].as_str().unwrap_or("GET").to_owned(),
                resource_type: params["type"].as_str().map(str::to_owned),
                started_at: now_ms(),
                status: None,
                mime_type: None,
                finished_at: None,
                encoded_data_length: None,
                failure: None,
            });
            return;
        }

        let Some(entry) = self
            .network
            .find_latest_mut(|entry| entry.request_id == request_id)
        else {
            return;
        };
        match method {
            "Network.responseReceived" => {
                let response = &params["response"];
                entry.status = response["status"].as_i64();
                entry.mime_type = response["mimeType"].as_str().map(str::to_owned);
            }
            "Network.loadingFinished" => {
                entry.finished_at = Some(now_ms());
                entry.encoded_data_length = params["encodedDataLength"].as_f64();
            }
            "Network.loadingFailed" => {
                entry.finished_at = Some(now_ms());
                entry.failure = Some(
                    params["errorText"]
                        .as_str()
                        .unwrap_or("loading failed")
                        .to_owned(),
                );
            }
            _ => {}
        }
    }

    /// Applies one `Animation.*` lifecycle event.
    pub fn record_animation(&mut self, method: &str, params: &Value) {
        let (id, phase) = match method {
            "Animation.animationCreated" => (params["id"].as_str(), AnimationPhase::Created),
            "Animation.animationStarted" => {
                (params["animation"]["id"].as_str(), AnimationPhase::Started)
            }
            "Animation.animationCanceled" => (params["id"].as_str(), AnimationPhase::Canceled),
            _ => return,
        };
        let Some(id) = id else {
            return;
        };

        let animation = &params["animation"];
        if let Some(entry) = self.animations.find_latest_mut(|entry| entry.id == id) {
            entry.phase = phase;
            entry.updated_at = now_ms();
            if phase == AnimationPhase::Started {
                entry.name = animation["name"].as_str().map(str::to_owned);
                entry.kind = animation["type"].as_str().map(str::to_owned);
                entry.duration_ms = animation["source"]["duration"].as_f64();
            }
            return;
        }

        self.animations.push(AnimationEntry {
            id: id.to_owned(),
            phase,
            name: animation["name"].as_str().map(str::to_owned),
            kind: animation["type"].as_str().map(str::to_owned),
            duration_ms: animation["source"]["duration"].as_f64(),
            updated_at: now_ms(),
        });
    }
}

/// Per-extension error capture results. Survives tab close and repeated
/// attach cycles; only an explicit clear empties it.
#[derive(Debug, Clone)]
pub struct ExtensionErrorStore {
    pub errors: RingBuffer<ConsoleEntry>,
    pub console: RingBuffer<ConsoleEntry>,
}

impl ExtensionErrorStore {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            errors: RingBuffer::new(limit),
            console: RingBuffer::new(limit),
        }
    }

    pub fn record(&mut self, entry: &ConsoleEntry) {
        if entry.is_error() {
            self.errors.push(entry.clone());
        }
        if entry.source != ConsoleSource::Exception {
            self.console.push(entry.clone());
        }
    }

    pub fn clear(&mut self) {
        self.errors.clear();
        self.console.clear();
    }
}
