//! Scripted transport doubles for exercising adapters and streams without a network.
//!
//! Enabled for unit tests and, through the `testkit` feature, for integration tests.

use crate::core::errors::ExchangeError;
use crate::core::kernel::{RestClient, RestRequest, Signer, WsCodec, WsSession};
use crate::core::types::{StreamEvent, SubscriptionKey};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn eventually(what: &str, mut done: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

// REST

#[derive(Debug, Clone)]
enum MockResponse {
    Body(String),
    Transport(String),
}

#[derive(Debug, Default)]
struct MockRestState {
    routes: HashMap<(Option<Method>, String), MockResponse>,
    requests: Vec<RestRequest>,
}

/// `RestClient` answering from a fixed route table and recording every request.
///
/// Routes registered with a method take precedence over method-agnostic ones.
/// Unrouted requests fail with a transport error.
#[derive(Debug, Clone, Default)]
pub struct MockRest {
    state: Arc<Mutex<MockRestState>>,
}

impl MockRest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn respond(self, endpoint: &str, body: impl Into<String>) -> Self {
        self.route(None, endpoint, MockResponse::Body(body.into()))
    }

    #[must_use]
    pub fn respond_to(self, method: Method, endpoint: &str, body: impl Into<String>) -> Self {
        self.route(Some(method), endpoint, MockResponse::Body(body.into()))
    }

    #[must_use]
    pub fn fail(self, endpoint: &str, message: impl Into<String>) -> Self {
        self.route(None, endpoint, MockResponse::Transport(message.into()))
    }

    fn route(self, method: Option<Method>, endpoint: &str, response: MockResponse) -> Self {
        lock(&self.state)
            .routes
            .insert((method, endpoint.to_string()), response);
        self
    }

    pub fn requests(&self) -> Vec<RestRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn requests_to(&self, endpoint: &str) -> Vec<RestRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }
}

#[async_trait]
impl RestClient for MockRest {
    async fn execute(&self, request: RestRequest) -> Result<String, ExchangeError> {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());

        let response = state
            .routes
            .get(&(Some(request.method.clone()), request.endpoint.clone()))
            .or_else(|| state.routes.get(&(None, request.endpoint.clone())))
            .cloned();

        match response {
            Some(MockResponse::Body(body)) => Ok(body),
            Some(MockResponse::Transport(message)) => {
                Err(ExchangeError::transport(&request.endpoint, message))
            }
            None => Err(ExchangeError::transport(
                &request.endpoint,
                "no scripted response",
            )),
        }
    }
}

// WebSocket

/// One step of a scripted connection.
#[derive(Debug, Clone)]
pub enum ScriptedFrame {
    Text(String),
    /// Peer closes the connection.
    Disconnect,
    /// Transport error on read.
    Error(String),
    /// Hold further frames until this many frames have been sent in total.
    AwaitSent(usize),
}

impl ScriptedFrame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Frame that `MockCodec` decodes back into `event`.
    pub fn event(event: &StreamEvent) -> Self {
        Self::Text(serde_json::to_string(event).unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct MockWsState {
    scripts: VecDeque<Vec<ScriptedFrame>>,
    current: VecDeque<ScriptedFrame>,
    failed_connects: usize,
    connects: usize,
    connected: bool,
    sent: Vec<String>,
}

/// `WsSession` replaying one script per `connect`.
///
/// Once a connection's script is exhausted, reads wait forever, like an idle socket.
#[derive(Debug, Clone, Default)]
pub struct MockWs {
    state: Arc<Mutex<MockWsState>>,
    sent_signal: Arc<Notify>,
}

impl MockWs {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_connection(self, frames: Vec<ScriptedFrame>) -> Self {
        lock(&self.state).scripts.push_back(frames);
        self
    }

    /// The next `count` connection attempts fail.
    #[must_use]
    pub fn failing_connects(self, count: usize) -> Self {
        lock(&self.state).failed_connects = count;
        self
    }

    /// Text of every frame sent so far, across connections.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub async fn wait_for_sent(&self, count: usize) {
        eventually("sent frames", || self.sent().len() >= count).await;
    }

    pub async fn wait_for_connects(&self, count: usize) {
        eventually("connections", || self.connects() >= count).await;
    }
}

#[async_trait]
impl WsSession for MockWs {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.failed_connects > 0 {
            state.failed_connects -= 1;
            return Err(ExchangeError::transport("mock://ws", "connection refused"));
        }
        let script = state.scripts.pop_front().unwrap_or_default();
        state.current = script.into();
        state.connected = true;
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(ExchangeError::transport("mock://ws", "not connected"));
            }
            let text = match msg {
                Message::Text(text) => text,
                other => other.to_string(),
            };
            state.sent.push(text);
        }
        self.sent_signal.notify_waiters();
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            let notified = self.sent_signal.notified();
            let step = {
                let mut state = lock(&self.state);
                match state.current.front() {
                    Some(ScriptedFrame::AwaitSent(n)) if state.sent.len() < *n => None,
                    Some(_) => state.current.pop_front(),
                    None => None,
                }
            };

            match step {
                Some(ScriptedFrame::Text(text)) => return Some(Ok(Message::Text(text))),
                Some(ScriptedFrame::Disconnect) => {
                    lock(&self.state).connected = false;
                    return None;
                }
                Some(ScriptedFrame::Error(message)) => {
                    lock(&self.state).connected = false;
                    return Some(Err(ExchangeError::transport("mock://ws", message)));
                }
                Some(ScriptedFrame::AwaitSent(_)) => {}
                None => notified.await,
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        lock(&self.state).connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

/// Codec with a human-readable control protocol.
///
/// - subscribe: `sub:<topic>[:<symbol>]`, unsubscribe: `unsub:...`
/// - login: `login:<api key>:<time>:<signature>`
/// - inbound `ack` frames are swallowed; everything else must be a JSON `StreamEvent`
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCodec;

impl WsCodec for MockCodec {
    fn encode_subscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError> {
        Ok(Message::Text(format!("sub:{}", key)))
    }

    fn encode_unsubscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError> {
        Ok(Message::Text(format!("unsub:{}", key)))
    }

    fn encode_login(&self, signer: &dyn Signer, time_ms: u64) -> Result<Message, ExchangeError> {
        let signature = signer.sign(&format!("{}websocket_login", time_ms))?;
        Ok(Message::Text(format!(
            "login:{}:{}:{}",
            signer.api_key(),
            time_ms,
            signature
        )))
    }

    fn decode_message(&self, message: Message) -> Result<Vec<StreamEvent>, ExchangeError> {
        let text = message
            .into_text()
            .map_err(|e| ExchangeError::decode("mock://ws", e))?;
        if text == "ack" {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text)
            .map(|event| vec![event])
            .map_err(|e| ExchangeError::decode("mock://ws", e))
    }
}
