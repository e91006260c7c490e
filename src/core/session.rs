use crate::core::errors::ExchangeError;
use crate::core::kernel::{wait_for_shutdown, Signer, WsCodec, WsSession};
use crate::core::stream::{conduit, EventReceiver, EventSender, StreamConfig, StreamHandle, StreamMultiplexer};
use crate::core::traits::ExchangeConnector;
use crate::core::types::{ChannelKind, Subscription, SubscriptionKey, Topic};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Live,
    ShutDown,
}

#[derive(Debug)]
struct LiveEntry {
    id: u64,
    shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    live: Mutex<HashMap<(String, String), LiveEntry>>,
}

impl RegistryInner {
    fn live(&self) -> MutexGuard<'_, HashMap<(String, String), LiveEntry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks which (exchange, credential) pairs currently have a live session.
///
/// Owned by the caller and shared by cloning. A pair is free again once its session
/// shuts down, is cancelled, or is dropped.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self, exchange: &str, api_key: &str) -> bool {
        let key = (exchange.to_string(), credential_id(api_key));
        self.inner
            .live()
            .get(&key)
            .is_some_and(|entry| !*entry.shutdown.borrow())
    }

    fn acquire(
        &self,
        exchange: &str,
        credential: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SessionLease, ExchangeError> {
        let key = (exchange.to_string(), credential.to_string());
        let mut live = self.inner.live();

        if let Some(entry) = live.get(&key) {
            let stopped = *entry.shutdown.borrow();
            if !stopped {
                return Err(ExchangeError::AlreadyInitialized(format!(
                    "a {} session for this credential is already live",
                    exchange
                )));
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        live.insert(key.clone(), LiveEntry { id, shutdown });
        Ok(SessionLease {
            registry: Arc::clone(&self.inner),
            key,
            id,
        })
    }
}

/// Released on drop.
#[derive(Debug)]
struct SessionLease {
    registry: Arc<RegistryInner>,
    key: (String, String),
    id: u64,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut live = self.registry.live();
        if live.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            live.remove(&self.key);
        }
    }
}

// The registry never holds the raw key.
fn credential_id(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Runtime object for one credential set on one exchange.
///
/// Lifecycle: build, `create_output_conduit`, `connect`, subscribe, `shutdown`.
pub struct Session<W, C> {
    exchange: String,
    credential: Option<String>,
    registry: SessionRegistry,
    signer: Option<Arc<dyn Signer>>,
    rest: Option<Arc<dyn ExchangeConnector>>,
    pending_public: Option<StreamMultiplexer<W, C>>,
    pending_private: Option<StreamMultiplexer<W, C>>,
    cancellation: Option<watch::Receiver<bool>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    events: Option<EventSender>,
    conduit_created: bool,
    public: Option<StreamHandle>,
    private: Option<StreamHandle>,
    public_keys: BTreeSet<SubscriptionKey>,
    private_keys: BTreeSet<SubscriptionKey>,
    lease: Option<SessionLease>,
    state: SessionState,
}

impl<W, C> std::fmt::Debug for Session<W, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("exchange", &self.exchange)
            .field("state", &self.state)
            .field("public_keys", &self.public_keys)
            .field("private_keys", &self.private_keys)
            .finish_non_exhaustive()
    }
}

pub struct SessionBuilder<W, C> {
    exchange: String,
    registry: SessionRegistry,
    api_key: Option<String>,
    signer: Option<Arc<dyn Signer>>,
    rest: Option<Arc<dyn ExchangeConnector>>,
    public: Option<(W, C)>,
    private: Option<(W, C)>,
    stream_config: StreamConfig,
    cancellation: Option<watch::Receiver<bool>>,
}

impl<W, C> SessionBuilder<W, C>
where
    W: WsSession + 'static,
    C: WsCodec,
{
    pub fn new(exchange: impl Into<String>, registry: &SessionRegistry) -> Self {
        Self {
            exchange: exchange.into(),
            registry: registry.clone(),
            api_key: None,
            signer: None,
            rest: None,
            public: None,
            private: None,
            stream_config: StreamConfig::default(),
            cancellation: None,
        }
    }

    /// Credential used for private stream login; also identifies the session in the registry.
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.api_key = Some(signer.api_key().to_string());
        self.signer = Some(signer);
        self
    }

    pub fn rest(mut self, rest: Arc<dyn ExchangeConnector>) -> Self {
        self.rest = Some(rest);
        self
    }

    pub fn public_stream(mut self, ws: W, codec: C) -> Self {
        self.public = Some((ws, codec));
        self
    }

    pub fn private_stream(mut self, ws: W, codec: C) -> Self {
        self.private = Some((ws, codec));
        self
    }

    pub fn stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Caller-owned cancellation: raising the flag shuts the session down.
    pub fn cancellation(mut self, cancellation: watch::Receiver<bool>) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn build(self) -> Result<Session<W, C>, ExchangeError> {
        let pending_private = match (self.private, &self.signer) {
            (Some((ws, codec)), Some(signer)) => Some(
                StreamMultiplexer::private(ws, codec, Arc::clone(signer))
                    .with_config(self.stream_config.clone()),
            ),
            (Some(_), None) => {
                return Err(ExchangeError::Auth(
                    "private stream requires credentials".to_string(),
                ))
            }
            (None, _) => None,
        };
        let pending_public = self.public.map(|(ws, codec)| {
            StreamMultiplexer::public(ws, codec).with_config(self.stream_config.clone())
        });

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Session {
            exchange: self.exchange,
            credential: self
                .api_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .map(credential_id),
            registry: self.registry,
            signer: self.signer,
            rest: self.rest,
            pending_public,
            pending_private,
            cancellation: self.cancellation,
            shutdown_tx: Arc::new(shutdown_tx),
            events: None,
            conduit_created: false,
            public: None,
            private: None,
            public_keys: BTreeSet::new(),
            private_keys: BTreeSet::new(),
            lease: None,
            state: SessionState::Idle,
        })
    }
}

impl<W, C> Session<W, C>
where
    W: WsSession + 'static,
    C: WsCodec,
{
    pub fn builder(exchange: impl Into<String>, registry: &SessionRegistry) -> SessionBuilder<W, C> {
        SessionBuilder::new(exchange, registry)
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn state(&self) -> SessionState {
        let stopped = *self.shutdown_tx.borrow();
        match self.state {
            SessionState::Live if stopped => SessionState::ShutDown,
            state => state,
        }
    }

    /// REST adapter bound to this session's credential.
    pub fn rest(&self) -> Result<Arc<dyn ExchangeConnector>, ExchangeError> {
        self.rest.clone().ok_or_else(|| {
            ExchangeError::Uninitialized(format!("no {} REST adapter configured", self.exchange))
        })
    }

    pub fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.signer.clone()
    }

    /// Shutdown signal for wiring further cancellable work (e.g. a REST client) to this session.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn create_output_conduit(&mut self, capacity: usize) -> Result<EventReceiver, ExchangeError> {
        if self.conduit_created {
            return Err(ExchangeError::AlreadyInitialized(
                "output conduit already created".to_string(),
            ));
        }
        let (tx, rx) = conduit(capacity, self.shutdown_tx.subscribe());
        self.events = Some(tx);
        self.conduit_created = true;
        Ok(rx)
    }

    #[instrument(skip(self), fields(exchange = %self.exchange))]
    pub async fn connect(&mut self) -> Result<(), ExchangeError> {
        match self.state() {
            SessionState::Idle => {}
            SessionState::Live => {
                return Err(ExchangeError::AlreadyInitialized(
                    "session is already connected".to_string(),
                ))
            }
            SessionState::ShutDown => {
                return Err(ExchangeError::Uninitialized(
                    "session has been shut down".to_string(),
                ))
            }
        }
        let Some(events) = self.events.take() else {
            return Err(ExchangeError::Uninitialized(
                "create an output conduit before connecting".to_string(),
            ));
        };

        // read-only sessions take no lease
        if let Some(credential) = &self.credential {
            match self
                .registry
                .acquire(&self.exchange, credential, self.shutdown_tx.subscribe())
            {
                Ok(lease) => self.lease = Some(lease),
                Err(e) => {
                    self.events = Some(events);
                    return Err(e);
                }
            }
        }

        if let Some(mut external) = self.cancellation.take() {
            let tx = Arc::clone(&self.shutdown_tx);
            let mut internal = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    () = wait_for_shutdown(&mut external) => {
                        info!("session cancelled by caller");
                        tx.send_replace(true);
                    }
                    () = wait_for_shutdown(&mut internal) => {}
                }
            });
        }

        if let Some(mux) = self.pending_public.take() {
            self.public = Some(mux.spawn(events.clone(), self.shutdown_tx.subscribe()));
        }
        if let Some(mux) = self.pending_private.take() {
            self.private = Some(mux.spawn(events, self.shutdown_tx.subscribe()));
        }

        self.state = SessionState::Live;
        info!("session live");
        Ok(())
    }

    /// Subscribe every topic for every symbol. Pairs already subscribed are skipped.
    pub async fn subscribe_public(
        &mut self,
        topics: &[Topic],
        symbols: &[String],
    ) -> Result<(), ExchangeError> {
        let keys = Subscription::public(topics.to_vec(), symbols.to_vec()).keys()?;
        self.subscribe(ChannelKind::Public, keys).await
    }

    pub async fn subscribe_private(&mut self, topics: &[Topic]) -> Result<(), ExchangeError> {
        let keys = Subscription::private(topics.to_vec()).keys()?;
        self.subscribe(ChannelKind::Private, keys).await
    }

    pub async fn unsubscribe_public(
        &mut self,
        topics: &[Topic],
        symbols: &[String],
    ) -> Result<(), ExchangeError> {
        let keys = Subscription::public(topics.to_vec(), symbols.to_vec()).keys()?;
        self.ensure_live()?;
        let mut tracked: Vec<SubscriptionKey> = Vec::new();
        for key in keys {
            if self.public_keys.contains(&key) && !tracked.contains(&key) {
                tracked.push(key);
            }
        }
        if tracked.is_empty() {
            return Ok(());
        }
        self.handle(ChannelKind::Public)?
            .unsubscribe(tracked.clone())
            .await?;
        for key in &tracked {
            self.public_keys.remove(key);
        }
        Ok(())
    }

    /// Current subscription set of one channel.
    pub fn subscriptions(&self, channel: ChannelKind) -> Vec<SubscriptionKey> {
        match channel {
            ChannelKind::Public => self.public_keys.iter().cloned().collect(),
            ChannelKind::Private => self.private_keys.iter().cloned().collect(),
        }
    }

    /// Stop the streams, close the sockets and release the credential. Idempotent.
    #[instrument(skip(self), fields(exchange = %self.exchange))]
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::ShutDown {
            return;
        }
        self.shutdown_tx.send_replace(true);
        self.events = None;

        for handle in [self.public.take(), self.private.take()].into_iter().flatten() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.join()).await.is_err() {
                warn!("stream did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }

        self.lease = None;
        self.state = SessionState::ShutDown;
        info!("session shut down");
    }

    fn ensure_live(&self) -> Result<(), ExchangeError> {
        match self.state() {
            SessionState::Live => Ok(()),
            SessionState::Idle => Err(ExchangeError::Uninitialized(
                "session is not connected".to_string(),
            )),
            SessionState::ShutDown => Err(ExchangeError::Uninitialized(
                "session has been shut down".to_string(),
            )),
        }
    }

    fn handle(&self, channel: ChannelKind) -> Result<&StreamHandle, ExchangeError> {
        let handle = match channel {
            ChannelKind::Public => self.public.as_ref(),
            ChannelKind::Private => self.private.as_ref(),
        };
        handle.ok_or_else(|| {
            ExchangeError::Uninitialized(format!("no {:?} stream configured", channel))
        })
    }

    async fn subscribe(
        &mut self,
        channel: ChannelKind,
        keys: Vec<SubscriptionKey>,
    ) -> Result<(), ExchangeError> {
        self.ensure_live()?;
        let handle = self.handle(channel)?;

        let tracked = match channel {
            ChannelKind::Public => &self.public_keys,
            ChannelKind::Private => &self.private_keys,
        };
        let mut fresh: Vec<SubscriptionKey> = Vec::new();
        for key in keys {
            if !tracked.contains(&key) && !fresh.contains(&key) {
                fresh.push(key);
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }
        // only pairs the stream accepted count as subscribed
        handle.subscribe(fresh.clone()).await?;
        match channel {
            ChannelKind::Public => self.public_keys.extend(fresh),
            ChannelKind::Private => self.private_keys.extend(fresh),
        }
        Ok(())
    }
}

impl<W, C> Drop for Session<W, C> {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
