use crate::core::errors::ExchangeError;
use crate::core::kernel::{Signer, WsCodec};
use crate::core::types::{
    BookAction, BookLevel, ChannelKind, Fill, Order, OrderSide, OrderStatus, OrderType,
    OrderbookDelta, StreamEvent, StreamPayload, SubscriptionKey, Ticker, TimeInForce, Trade,
};
use crate::exchanges::ftx::types::{
    FtxFill, FtxLoginArgs, FtxLoginRequest, FtxOrder, FtxOrderbook, FtxTicker, FtxTrade,
    FtxWsMessage, FtxWsRequest,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use tokio_tungstenite::tungstenite::Message;

const ENDPOINT: &str = "ftx-ws";

fn encode<T: Serialize>(frame: &T) -> Result<Message, ExchangeError> {
    serde_json::to_string(frame)
        .map(Message::Text)
        .map_err(|e| ExchangeError::InvalidParameters(format!("Failed to encode frame: {}", e)))
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, ExchangeError> {
    serde_json::from_value(data).map_err(|e| ExchangeError::decode(ENDPOINT, e))
}

fn parse_side(side: &str) -> Result<OrderSide, ExchangeError> {
    match side {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(ExchangeError::decode(ENDPOINT, format!("unexpected side '{}'", other))),
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Fractional epoch seconds to UTC time.
fn seconds_to_datetime(seconds: Decimal) -> Option<DateTime<Utc>> {
    (seconds * Decimal::ONE_THOUSAND)
        .trunc()
        .to_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn level_value(value: &Value) -> Result<Decimal, ExchangeError> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| ExchangeError::decode(ENDPOINT, format!("book level '{}': {}", text, e)))
}

fn parse_levels(levels: &[[Value; 2]]) -> Result<Vec<BookLevel>, ExchangeError> {
    levels
        .iter()
        .map(|[price, size]| {
            Ok(BookLevel {
                price: level_value(price)?,
                size: level_value(size)?,
            })
        })
        .collect()
}

/// Open orders with fills are partially filled; closed orders are filled only when
/// nothing remains.
fn order_status(order: &FtxOrder) -> Result<OrderStatus, ExchangeError> {
    match order.status.as_str() {
        "new" => Ok(OrderStatus::New),
        "open" if order.filled_size > Decimal::ZERO => Ok(OrderStatus::PartiallyFilled),
        "open" => Ok(OrderStatus::New),
        "closed" if order.filled_size >= order.size => Ok(OrderStatus::Filled),
        "closed" => Ok(OrderStatus::Cancelled),
        other => Err(ExchangeError::decode(
            ENDPOINT,
            format!("unexpected order status '{}'", other),
        )),
    }
}

fn convert_order(order: &FtxOrder) -> Result<Order, ExchangeError> {
    let order_type = match order.order_type.as_str() {
        "limit" => OrderType::Limit,
        "market" => OrderType::Market,
        other => {
            return Err(ExchangeError::decode(
                ENDPOINT,
                format!("unexpected order type '{}'", other),
            ))
        }
    };
    let time_in_force = if order.post_only {
        Some(TimeInForce::PostOnly)
    } else if order.ioc {
        Some(TimeInForce::IOC)
    } else {
        Some(TimeInForce::GTC)
    };

    Ok(Order {
        id: order.id.to_string(),
        client_id: order.client_id.clone(),
        symbol: order.market.clone(),
        side: parse_side(&order.side)?,
        order_type,
        price: order.price,
        size: order.size,
        filled_size: order.filled_size,
        remaining_size: order.remaining_size,
        status: order_status(order)?,
        time_in_force,
        created_at: parse_time(order.created_at.as_deref()),
    })
}

fn convert_fill(fill: &FtxFill) -> Result<Fill, ExchangeError> {
    Ok(Fill {
        order_id: fill.order_id.to_string(),
        trade_id: fill.trade_id.or(fill.id).map(|id| id.to_string()),
        symbol: fill.market.clone(),
        side: parse_side(&fill.side)?,
        price: fill.price,
        size: fill.size,
        fee: fill.fee,
        fee_currency: fill.fee_currency.clone(),
        time: parse_time(fill.time.as_deref()),
    })
}

/// Codec for the `{op, channel, market}` stream protocol.
///
/// Login signs `{time}websocket_login` with the account secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtxCodec;

impl FtxCodec {
    fn control(op: &str, key: &SubscriptionKey) -> FtxWsRequest {
        FtxWsRequest {
            op: op.to_string(),
            channel: Some(key.topic.to_string()),
            market: key.symbol.clone(),
        }
    }

    fn decode_data(
        &self,
        channel: &str,
        market: Option<String>,
        data: Value,
    ) -> Result<Vec<StreamEvent>, ExchangeError> {
        let event = match channel {
            "ticker" => {
                let symbol = market.clone().unwrap_or_default();
                let ticker: FtxTicker = parse(data)?;
                StreamPayload::Ticker(Ticker {
                    symbol,
                    bid: ticker.bid,
                    ask: ticker.ask,
                    last: ticker.last,
                    mark: None,
                    time: ticker.time.and_then(seconds_to_datetime),
                })
            }
            "trades" => {
                let symbol = market.clone().unwrap_or_default();
                let raw: Vec<FtxTrade> = parse(data)?;
                let trades = raw
                    .iter()
                    .map(|t| {
                        Ok(Trade {
                            id: t.id.map(|id| id.to_string()),
                            symbol: symbol.clone(),
                            side: parse_side(&t.side)?,
                            price: t.price,
                            size: t.size,
                            time: parse_time(t.time.as_deref()),
                        })
                    })
                    .collect::<Result<Vec<_>, ExchangeError>>()?;
                StreamPayload::Trades(trades)
            }
            "orderbook" => {
                let book: FtxOrderbook = parse(data)?;
                let action = match book.action.as_str() {
                    "partial" => BookAction::Snapshot,
                    "update" => BookAction::Update,
                    other => {
                        return Err(ExchangeError::decode(
                            ENDPOINT,
                            format!("unexpected book action '{}'", other),
                        ))
                    }
                };
                StreamPayload::OrderbookDelta(OrderbookDelta {
                    symbol: market.clone().unwrap_or_default(),
                    action,
                    bids: parse_levels(&book.bids)?,
                    asks: parse_levels(&book.asks)?,
                    sequence: None,
                    checksum: book.checksum,
                })
            }
            "orders" => {
                let order = convert_order(&parse(data)?)?;
                return Ok(vec![StreamEvent::new(
                    Some(order.symbol.clone()),
                    StreamPayload::OrderUpdate(order),
                )]);
            }
            "fills" => {
                let fill = convert_fill(&parse(data)?)?;
                return Ok(vec![StreamEvent::new(
                    Some(fill.symbol.clone()),
                    StreamPayload::Fill(fill),
                )]);
            }
            other => {
                return Err(ExchangeError::decode(
                    ENDPOINT,
                    format!("unknown channel '{}'", other),
                ))
            }
        };

        Ok(vec![StreamEvent::new(market, event)])
    }
}

impl WsCodec for FtxCodec {
    fn encode_subscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError> {
        if key.channel() == ChannelKind::Public && key.symbol.is_none() {
            return Err(ExchangeError::InvalidParameters(format!(
                "{} subscription needs a market",
                key.topic
            )));
        }
        encode(&Self::control("subscribe", key))
    }

    fn encode_unsubscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError> {
        encode(&Self::control("unsubscribe", key))
    }

    fn encode_login(&self, signer: &dyn Signer, time_ms: u64) -> Result<Message, ExchangeError> {
        let sign = signer.sign(&format!("{}websocket_login", time_ms))?;
        encode(&FtxLoginRequest {
            op: "login".to_string(),
            args: FtxLoginArgs {
                key: signer.api_key().to_string(),
                sign,
                time: time_ms,
            },
        })
    }

    fn encode_ping(&self) -> Option<Message> {
        encode(&FtxWsRequest {
            op: "ping".to_string(),
            channel: None,
            market: None,
        })
        .ok()
    }

    fn decode_message(&self, message: Message) -> Result<Vec<StreamEvent>, ExchangeError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(_) => return Err(ExchangeError::decode(ENDPOINT, "binary frame")),
            // ping/pong/close are handled by the socket
            _ => return Ok(Vec::new()),
        };
        let frame: FtxWsMessage =
            serde_json::from_str(&text).map_err(|e| ExchangeError::decode(ENDPOINT, e))?;

        match frame.message_type.as_str() {
            "subscribed" | "unsubscribed" | "pong" | "info" => Ok(Vec::new()),
            "error" => Ok(vec![StreamEvent::new(
                frame.market,
                StreamPayload::Error(format!(
                    "{}: {}",
                    frame.code.unwrap_or_default(),
                    frame.msg.unwrap_or_default()
                )),
            )]),
            "partial" | "update" => {
                let channel = frame
                    .channel
                    .ok_or_else(|| ExchangeError::decode(ENDPOINT, "data frame without channel"))?;
                let data = frame
                    .data
                    .ok_or_else(|| ExchangeError::decode(ENDPOINT, "data frame without data"))?;
                self.decode_data(&channel, frame.market, data)
            }
            other => Err(ExchangeError::decode(
                ENDPOINT,
                format!("unknown frame type '{}'", other),
            )),
        }
    }
}
