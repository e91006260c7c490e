//! Stream multiplexer.
//!
//! One background task per socket connection:
//! - classifies every inbound frame through the exchange codec and publishes it on the
//!   shared output conduit, in arrival order
//! - blocks on a full conduit instead of dropping
//! - tracks the subscription set and replays it (after a fresh login on private
//!   connections) whenever the connection is re-established
//! - reconnects with exponential backoff until the shutdown signal fires

use crate::core::errors::ExchangeError;
use crate::core::kernel::{wait_for_shutdown, Signer, WsCodec, WsSession};
use crate::core::types::{ChannelKind, StreamEvent, SubscriptionKey};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, trace, warn};

pub type EventSender = mpsc::Sender<StreamEvent>;

/// Bounded, ordered delivery of stream events to one consumer.
///
/// Once the shutdown signal fires, `recv` returns `None` even if events are still buffered.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<StreamEvent>,
    shutdown: watch::Receiver<bool>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        tokio::select! {
            biased;
            () = wait_for_shutdown(&mut self.shutdown) => None,
            event = self.rx.recv() => event,
        }
    }

    /// Non-blocking receive; `None` when empty or shut down.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        let stopped = *self.shutdown.borrow();
        if stopped {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

/// Create a conduit of the given capacity tied to a shutdown signal.
pub fn conduit(capacity: usize, shutdown: watch::Receiver<bool>) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, EventReceiver { rx, shutdown })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Application-level ping cadence, when the codec defines a ping frame.
    pub ping_interval: Duration,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub command_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            base_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
            command_buffer: 64,
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<SubscriptionKey>),
    Unsubscribe(Vec<SubscriptionKey>),
}

enum Disconnect {
    Shutdown,
    Lost(String),
}

/// Unstarted multiplexer for one connection.
pub struct StreamMultiplexer<W, C> {
    ws: W,
    codec: C,
    channel: ChannelKind,
    signer: Option<Arc<dyn Signer>>,
    config: StreamConfig,
}

impl<W, C> StreamMultiplexer<W, C>
where
    W: WsSession + 'static,
    C: WsCodec,
{
    pub fn public(ws: W, codec: C) -> Self {
        Self {
            ws,
            codec,
            channel: ChannelKind::Public,
            signer: None,
            config: StreamConfig::default(),
        }
    }

    /// Private connections send a signed login frame before every subscription replay.
    pub fn private(ws: W, codec: C, signer: Arc<dyn Signer>) -> Self {
        Self {
            ws,
            codec,
            channel: ChannelKind::Private,
            signer: Some(signer),
            config: StreamConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the read loop.
    pub fn spawn(self, events: EventSender, shutdown: watch::Receiver<bool>) -> StreamHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = StreamTask {
            ws: self.ws,
            codec: self.codec,
            channel: self.channel,
            signer: self.signer,
            config: self.config,
            events,
            cmd_rx,
            commands_open: true,
            shutdown,
            active: BTreeSet::new(),
            state_tx,
            reconnect_attempts: 0,
        };

        StreamHandle {
            channel: self.channel,
            cmd_tx,
            state: state_rx,
            task: tokio::spawn(task.run()),
        }
    }
}

/// Control handle for a running multiplexer.
#[derive(Debug)]
pub struct StreamHandle {
    channel: ChannelKind,
    cmd_tx: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub async fn subscribe(&self, keys: Vec<SubscriptionKey>) -> Result<(), ExchangeError> {
        self.send(Command::Subscribe(keys)).await
    }

    pub async fn unsubscribe(&self, keys: Vec<SubscriptionKey>) -> Result<(), ExchangeError> {
        self.send(Command::Unsubscribe(keys)).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the read loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("stream task failed: {}", e);
        }
    }

    async fn send(&self, command: Command) -> Result<(), ExchangeError> {
        let keys = match &command {
            Command::Subscribe(keys) | Command::Unsubscribe(keys) => keys,
        };
        if let Some(key) = keys.iter().find(|k| k.channel() != self.channel) {
            return Err(ExchangeError::InvalidParameters(format!(
                "{} does not belong on a {:?} connection",
                key, self.channel
            )));
        }
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| ExchangeError::Uninitialized("stream is closed".to_string()))
    }
}

struct StreamTask<W, C> {
    ws: W,
    codec: C,
    channel: ChannelKind,
    signer: Option<Arc<dyn Signer>>,
    config: StreamConfig,
    events: EventSender,
    cmd_rx: mpsc::Receiver<Command>,
    commands_open: bool,
    shutdown: watch::Receiver<bool>,
    active: BTreeSet<SubscriptionKey>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_attempts: u32,
}

impl<W, C> StreamTask<W, C>
where
    W: WsSession,
    C: WsCodec,
{
    fn set_state(&self, state: ConnectionState) {
        debug!(channel = ?self.channel, ?state, "stream state");
        self.state_tx.send_replace(state);
    }

    #[instrument(skip(self), fields(channel = ?self.channel))]
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => break,
                result = self.ws.connect() => result,
            };

            if let Err(e) = connected {
                warn!("stream connection failed: {}", e);
                self.set_state(ConnectionState::Reconnecting);
                if !self.publish(StreamEvent::error(format!("connection failed: {}", e))).await
                    || !self.backoff().await
                {
                    break;
                }
                continue;
            }

            self.set_state(ConnectionState::Subscribing);
            if let Err(e) = self.authenticate_and_replay().await {
                warn!("stream setup failed: {}", e);
                let _ = self.ws.close().await;
                self.set_state(ConnectionState::Reconnecting);
                if !self.publish(StreamEvent::error(format!("setup failed: {}", e))).await
                    || !self.backoff().await
                {
                    break;
                }
                continue;
            }

            self.reconnect_attempts = 0;
            self.set_state(ConnectionState::Streaming);
            info!(subscriptions = self.active.len(), "stream live");

            match self.run_connected().await {
                Disconnect::Shutdown => break,
                Disconnect::Lost(reason) => {
                    warn!("stream disconnected: {}", reason);
                    let _ = self.ws.close().await;
                    self.set_state(ConnectionState::Reconnecting);
                    if !self.publish(StreamEvent::error(format!("disconnected: {}", reason))).await
                        || !self.backoff().await
                    {
                        break;
                    }
                }
            }
        }

        let _ = self.ws.close().await;
        self.set_state(ConnectionState::Closed);
        info!("stream closed");
    }

    async fn authenticate_and_replay(&mut self) -> Result<(), ExchangeError> {
        if let Some(signer) = &self.signer {
            let time_ms = u64::try_from(chrono::Utc::now().timestamp_millis())
                .map_err(|e| ExchangeError::Signing(format!("local clock: {}", e)))?;
            let login = self.codec.encode_login(signer.as_ref(), time_ms)?;
            self.ws.send_raw(login).await?;
        }

        self.drain_commands();
        if !self.active.is_empty() {
            info!("Resubscribing to {} tracked subscription(s)", self.active.len());
        }
        for key in &self.active {
            let frame = self.codec.encode_subscription(key)?;
            self.ws.send_raw(frame).await?;
        }
        Ok(())
    }

    /// Fold commands queued while disconnected into the tracked set; replay sends them.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            match command {
                Command::Subscribe(keys) => self.active.extend(keys),
                Command::Unsubscribe(keys) => {
                    for key in &keys {
                        self.active.remove(key);
                    }
                }
            }
        }
    }

    async fn run_connected(&mut self) -> Disconnect {
        let period = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => return Disconnect::Shutdown,

                frame = self.ws.next_raw() => match frame {
                    Some(Ok(message)) => {
                        for event in self.classify(message) {
                            if !self.publish(event).await {
                                return Disconnect::Shutdown;
                            }
                        }
                    }
                    Some(Err(e)) => return Disconnect::Lost(e.to_string()),
                    None => return Disconnect::Lost("connection closed by peer".to_string()),
                },

                command = self.cmd_rx.recv(), if self.commands_open => match command {
                    Some(command) => {
                        if let Err(e) = self.apply(command).await {
                            return Disconnect::Lost(e.to_string());
                        }
                    }
                    None => self.commands_open = false,
                },

                _ = ping.tick() => {
                    if let Some(frame) = self.codec.encode_ping() {
                        if let Err(e) = self.ws.send_raw(frame).await {
                            return Disconnect::Lost(e.to_string());
                        }
                    }
                }
            }
        }
    }

    async fn apply(&mut self, command: Command) -> Result<(), ExchangeError> {
        match command {
            Command::Subscribe(keys) => {
                for key in keys {
                    if !self.active.insert(key.clone()) {
                        debug!(%key, "already subscribed");
                        continue;
                    }
                    let frame = self.codec.encode_subscription(&key)?;
                    self.ws.send_raw(frame).await?;
                }
            }
            Command::Unsubscribe(keys) => {
                for key in keys {
                    if !self.active.remove(&key) {
                        continue;
                    }
                    let frame = self.codec.encode_unsubscription(&key)?;
                    self.ws.send_raw(frame).await?;
                }
            }
        }
        Ok(())
    }

    /// Decode failures become `Undefined` events carrying the raw frame.
    fn classify(&self, message: Message) -> Vec<StreamEvent> {
        let raw = match &message {
            Message::Text(text) => text.clone(),
            Message::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            _ => String::new(),
        };
        trace!("frame: {}", raw);

        match self.codec.decode_message(message) {
            Ok(events) => events,
            Err(e) => {
                debug!("unclassified frame: {}", e);
                vec![StreamEvent::undefined(e.to_string(), raw)]
            }
        }
    }

    /// Waits for conduit capacity. Returns `false` when shutting down or the consumer is gone.
    async fn publish(&mut self, event: StreamEvent) -> bool {
        tokio::select! {
            biased;
            () = wait_for_shutdown(&mut self.shutdown) => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Returns `false` if shutdown fired while waiting.
    async fn backoff(&mut self) -> bool {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let delay = reconnect_delay(&self.config, self.reconnect_attempts);
        info!(
            "Reconnect attempt {} in {}ms",
            self.reconnect_attempts,
            delay.as_millis()
        );

        tokio::select! {
            biased;
            () = wait_for_shutdown(&mut self.shutdown) => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Exponential delay with up to 25% jitter, capped at `max_reconnect_delay`.
fn reconnect_delay(config: &StreamConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = config
        .base_reconnect_delay
        .saturating_mul(1u32 << exp)
        .min(config.max_reconnect_delay);
    let jitter_cap = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::random::<u64>() % (jitter_cap + 1)
    };
    (base + Duration::from_millis(jitter)).min(config.max_reconnect_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{StreamEventKind, StreamPayload, Topic};
    use crate::testing::{MockCodec, MockWs, ScriptedFrame};

    fn fast_config() -> StreamConfig {
        StreamConfig {
            ping_interval: Duration::from_secs(3600),
            base_reconnect_delay: Duration::from_millis(1),
            max_reconnect_delay: Duration::from_millis(5),
            command_buffer: 8,
        }
    }

    fn ticker_key(symbol: &str) -> SubscriptionKey {
        SubscriptionKey::new(Topic::Ticker, Some(symbol.to_string()))
    }

    async fn next(rx: &mut EventReceiver) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("conduit closed")
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let config = StreamConfig {
            base_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_millis(1_000),
            ..StreamConfig::default()
        };
        let first = reconnect_delay(&config, 1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert_eq!(reconnect_delay(&config, 30), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_unclassified_frame_becomes_undefined_event() {
        let ws = MockWs::new().with_connection(vec![ScriptedFrame::text("not json")]);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = conduit(4, stop_rx.clone());
        let _handle = StreamMultiplexer::public(ws, MockCodec)
            .with_config(fast_config())
            .spawn(tx, stop_rx);

        let event = next(&mut rx).await;
        assert_eq!(event.kind(), StreamEventKind::Undefined);
        if let StreamPayload::Undefined { raw, .. } = event.payload {
            assert_eq!(raw, "not json");
        }
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_sends_one_frame() {
        let ws = MockWs::new().with_connection(vec![]);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::public(ws.clone(), MockCodec)
            .with_config(fast_config())
            .spawn(tx, stop_rx);

        handle.subscribe(vec![ticker_key("BTC")]).await.unwrap();
        handle.subscribe(vec![ticker_key("BTC")]).await.unwrap();
        handle.subscribe(vec![ticker_key("ETH")]).await.unwrap();
        ws.wait_for_sent(2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = ws.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.iter().filter(|f| f.contains("BTC")).count(), 1);
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_wrong_channel_key_is_rejected() {
        let ws = MockWs::new().with_connection(vec![]);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::public(ws, MockCodec)
            .with_config(fast_config())
            .spawn(tx, stop_rx);

        let err = handle
            .subscribe(vec![SubscriptionKey::new(Topic::Fills, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_reconnect_emits_error_and_replays_subscriptions() {
        let ws = MockWs::new()
            .with_connection(vec![ScriptedFrame::AwaitSent(1), ScriptedFrame::Disconnect])
            .with_connection(vec![]);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::public(ws.clone(), MockCodec)
            .with_config(fast_config())
            .spawn(tx, stop_rx);
        handle.subscribe(vec![ticker_key("BTC")]).await.unwrap();

        let event = next(&mut rx).await;
        assert_eq!(event.kind(), StreamEventKind::Error);

        ws.wait_for_connects(2).await;
        ws.wait_for_sent(2).await;
        let sent = ws.sent();
        assert!(sent.iter().all(|f| f.starts_with("sub:ticker:BTC")));
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_private_connection_logs_in_before_subscribing() {
        let ws = MockWs::new().with_connection(vec![]);
        let signer: Arc<dyn Signer> = Arc::new(crate::core::kernel::HmacSigner::new(
            secrecy::Secret::new("key".into()),
            secrecy::Secret::new("secret".into()),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::private(ws.clone(), MockCodec, signer)
            .with_config(fast_config())
            .spawn(tx, stop_rx);

        handle
            .subscribe(vec![SubscriptionKey::new(Topic::Orders, None)])
            .await
            .unwrap();
        ws.wait_for_sent(2).await;

        let sent = ws.sent();
        assert!(sent[0].starts_with("login:key:"));
        assert_eq!(sent[1], "sub:orders");
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_private_reconnect_logs_in_again_before_replay() {
        let ws = MockWs::new()
            .with_connection(vec![ScriptedFrame::AwaitSent(2), ScriptedFrame::Disconnect])
            .with_connection(vec![]);
        let signer: Arc<dyn Signer> = Arc::new(crate::core::kernel::HmacSigner::new(
            secrecy::Secret::new("key".into()),
            secrecy::Secret::new("secret".into()),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::private(ws.clone(), MockCodec, signer)
            .with_config(fast_config())
            .spawn(tx, stop_rx);

        handle
            .subscribe(vec![SubscriptionKey::new(Topic::Orders, None)])
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.kind(), StreamEventKind::Error);

        ws.wait_for_connects(2).await;
        ws.wait_for_sent(4).await;
        let sent = ws.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent[0].starts_with("login:key:"));
        assert_eq!(sent[1], "sub:orders");
        assert!(sent[2].starts_with("login:key:"));
        assert_eq!(sent[3], "sub:orders");
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_reports_reconnecting() {
        let ws = MockWs::new().failing_connects(1).with_connection(vec![]);
        let config = StreamConfig {
            base_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_millis(500),
            ..fast_config()
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, mut rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::public(ws.clone(), MockCodec)
            .with_config(config)
            .spawn(tx, stop_rx);

        let event = next(&mut rx).await;
        assert_eq!(event.kind(), StreamEventKind::Error);
        assert_eq!(handle.state(), ConnectionState::Reconnecting);

        ws.wait_for_connects(2).await;
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream() {
        let ws = MockWs::new().with_connection(vec![]);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, _rx) = conduit(4, stop_rx.clone());
        let handle = StreamMultiplexer::public(ws, MockCodec)
            .with_config(fast_config())
            .spawn(tx, stop_rx);
        let mut states = handle.state_changes();

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("stream did not stop");
        assert_eq!(*states.borrow_and_update(), ConnectionState::Closed);
    }
}
