use crate::core::errors::ExchangeError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base/quote pair, independent of how a given exchange spells it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, ExchangeError> {
        let base = base.into().to_uppercase();
        let quote = quote.into().to_uppercase();

        if base.is_empty() || quote.is_empty() {
            return Err(ExchangeError::InvalidParameters(
                "Base and quote assets cannot be empty".to_string(),
            ));
        }

        Ok(Self { base, quote })
    }

    /// Concatenated form, e.g. `BTCUSDT`.
    pub fn concat(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Spot,
    Perp,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::Perp => write!(f, "perp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC, // Good Till Canceled
    IOC, // Immediate or Cancel
    FOK, // Fill or Kill
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub status: OrderStatus,
    pub time_in_force: Option<TimeInForce>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Replace this order with a newer snapshot of the same order.
    ///
    /// Returns `false` and leaves the order untouched once it is terminal, or when the
    /// snapshot is for a different id.
    pub fn refresh(&mut self, snapshot: Self) -> bool {
        if self.status.is_terminal() || snapshot.id != self.id {
            return false;
        }
        *self = snapshot;
        true
    }
}

/// Identifies an existing order for lookup or cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: String,
    pub symbol: Symbol,
    pub market: MarketKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderParams {
    pub symbol: Symbol,
    pub market: MarketKind,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub time_in_force: Option<TimeInForce>,
    pub client_id: Option<String>,
    pub reduce_only: bool,
}

impl PlaceOrderParams {
    pub fn limit(
        symbol: Symbol,
        market: MarketKind,
        side: OrderSide,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            symbol,
            market,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            size,
            time_in_force: Some(TimeInForce::GTC),
            client_id: None,
            reduce_only: false,
        }
    }

    pub fn market(symbol: Symbol, market: MarketKind, side: OrderSide, size: Decimal) -> Self {
        Self {
            symbol,
            market,
            side,
            order_type: OrderType::Market,
            price: None,
            size,
            time_in_force: None,
            client_id: None,
            reduce_only: false,
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    #[must_use]
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.size <= Decimal::ZERO {
            return Err(ExchangeError::InvalidParameters(format!(
                "order size must be positive, got {}",
                self.size
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(ExchangeError::InvalidParameters(
                "limit order requires a price".to_string(),
            )),
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => {
                Err(ExchangeError::InvalidParameters(format!(
                    "limit price must be positive, got {}",
                    price
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub liquidation_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub coin: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

impl Balance {
    pub fn zero(coin: impl Into<String>) -> Self {
        Self {
            coin: coin.into(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub mark: Option<Decimal>,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookAction {
    Snapshot,
    Update,
}

/// Raw book change as relayed by the exchange; no local book is maintained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookDelta {
    pub symbol: String,
    pub action: BookAction,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub sequence: Option<u64>,
    pub checksum: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub trade_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Option<Decimal>,
    pub fee_currency: Option<String>,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFilter {
    pub symbol: String,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub tick_size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub coin: String,
    pub chain: String,
    pub address: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpricedBalance {
    pub coin: String,
    pub market: MarketKind,
    pub amount: Decimal,
    pub reason: String,
}

/// USD value of an account, with every balance that could not be priced listed
/// instead of being counted as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountValuation {
    pub total_usd: Decimal,
    pub unpriced: Vec<UnpricedBalance>,
}

impl AccountValuation {
    pub fn is_complete(&self) -> bool {
        self.unpriced.is_empty()
    }
}

// Streaming

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Ticker,
    Trades,
    Orderbook,
    Orders,
    Fills,
}

impl Topic {
    pub fn channel(self) -> ChannelKind {
        match self {
            Self::Ticker | Self::Trades | Self::Orderbook => ChannelKind::Public,
            Self::Orders | Self::Fills => ChannelKind::Private,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ticker => "ticker",
            Self::Trades => "trades",
            Self::Orderbook => "orderbook",
            Self::Orders => "orders",
            Self::Fills => "fills",
        };
        f.write_str(name)
    }
}

/// One (topic, symbol) pair on the wire. Private topics are account-wide and carry no symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub topic: Topic,
    pub symbol: Option<String>,
}

impl SubscriptionKey {
    pub fn new(topic: Topic, symbol: Option<String>) -> Self {
        Self { topic, symbol }
    }

    pub fn channel(&self) -> ChannelKind {
        self.topic.channel()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}:{}", self.topic, symbol),
            None => write!(f, "{}", self.topic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub channel: ChannelKind,
    pub topics: Vec<Topic>,
    pub symbols: Vec<String>,
}

impl Subscription {
    pub fn public(topics: Vec<Topic>, symbols: Vec<String>) -> Self {
        Self {
            channel: ChannelKind::Public,
            topics,
            symbols,
        }
    }

    pub fn private(topics: Vec<Topic>) -> Self {
        Self {
            channel: ChannelKind::Private,
            topics,
            symbols: Vec::new(),
        }
    }

    /// Expand into wire keys, rejecting topics that belong to the other channel.
    pub fn keys(&self) -> Result<Vec<SubscriptionKey>, ExchangeError> {
        let mut keys = Vec::new();
        for topic in &self.topics {
            if topic.channel() != self.channel {
                return Err(ExchangeError::InvalidParameters(format!(
                    "topic {} is not a {:?} topic",
                    topic, self.channel
                )));
            }
            match self.channel {
                ChannelKind::Private => keys.push(SubscriptionKey::new(*topic, None)),
                ChannelKind::Public => {
                    if self.symbols.is_empty() {
                        return Err(ExchangeError::InvalidParameters(format!(
                            "public topic {} needs at least one symbol",
                            topic
                        )));
                    }
                    keys.extend(
                        self.symbols
                            .iter()
                            .map(|s| SubscriptionKey::new(*topic, Some(s.clone()))),
                    );
                }
            }
        }
        Ok(keys)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamEventKind {
    Ticker,
    Trades,
    OrderbookDelta,
    OrderUpdate,
    Fill,
    Error,
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPayload {
    Ticker(Ticker),
    Trades(Vec<Trade>),
    OrderbookDelta(OrderbookDelta),
    OrderUpdate(Order),
    Fill(Fill),
    /// Connection-level or exchange-reported failure.
    Error(String),
    /// A frame that could not be classified, kept so protocol drift is observable.
    Undefined { reason: String, raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub symbol: Option<String>,
    pub payload: StreamPayload,
}

impl StreamEvent {
    pub fn new(symbol: Option<String>, payload: StreamPayload) -> Self {
        Self { symbol, payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(None, StreamPayload::Error(message.into()))
    }

    pub fn undefined(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::new(
            None,
            StreamPayload::Undefined {
                reason: reason.into(),
                raw: raw.into(),
            },
        )
    }

    pub fn kind(&self) -> StreamEventKind {
        match self.payload {
            StreamPayload::Ticker(_) => StreamEventKind::Ticker,
            StreamPayload::Trades(_) => StreamEventKind::Trades,
            StreamPayload::OrderbookDelta(_) => StreamEventKind::OrderbookDelta,
            StreamPayload::OrderUpdate(_) => StreamEventKind::OrderUpdate,
            StreamPayload::Fill(_) => StreamEventKind::Fill,
            StreamPayload::Error(_) => StreamEventKind::Error,
            StreamPayload::Undefined { .. } => StreamEventKind::Undefined,
        }
    }
}
