use crate::core::errors::ExchangeError;
use crate::core::kernel::{Signer, WsCodec};
use crate::core::types::{StreamEvent, StreamPayload, SubscriptionKey, Topic};
use crate::exchanges::bybit::conversions::{
    convert_ws_execution, convert_ws_order, convert_ws_orderbook, convert_ws_ticker,
    convert_ws_trade,
};
use crate::exchanges::bybit::types::{
    BybitWsExecution, BybitWsOrder, BybitWsOrderbook, BybitWsPush, BybitWsRequest,
    BybitWsResponse, BybitWsTicker, BybitWsTrade,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

const ENDPOINT: &str = "bybit-ws";

/// Signed auth frames stay valid this long after the signing time.
pub const AUTH_EXPIRY_MS: u64 = 10_000;

/// Book depth requested for orderbook subscriptions.
pub const ORDERBOOK_DEPTH: u32 = 50;

/// Wire topic for a subscription key, e.g. `tickers.BTCUSDT` or `order`.
pub fn topic_name(key: &SubscriptionKey) -> Result<String, ExchangeError> {
    let symbol = || {
        key.symbol.as_deref().ok_or_else(|| {
            ExchangeError::InvalidParameters(format!("{} subscription needs a symbol", key.topic))
        })
    };

    Ok(match key.topic {
        Topic::Ticker => format!("tickers.{}", symbol()?),
        Topic::Trades => format!("publicTrade.{}", symbol()?),
        Topic::Orderbook => format!("orderbook.{}.{}", ORDERBOOK_DEPTH, symbol()?),
        Topic::Orders => "order".to_string(),
        Topic::Fills => "execution".to_string(),
    })
}

fn encode(request: &BybitWsRequest) -> Result<Message, ExchangeError> {
    serde_json::to_string(request)
        .map(Message::Text)
        .map_err(|e| ExchangeError::InvalidParameters(format!("Failed to encode frame: {}", e)))
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, ExchangeError> {
    serde_json::from_value(data).map_err(|e| ExchangeError::decode(ENDPOINT, e))
}

/// Items of a push whose `data` may be a single object or an array.
fn parse_items<T: DeserializeOwned>(data: Value) -> Result<Vec<T>, ExchangeError> {
    match data {
        Value::Array(items) => items.into_iter().map(parse).collect(),
        single => Ok(vec![parse(single)?]),
    }
}

/// Bybit v5 WebSocket codec implementation
///
/// Public and private connections share the codec; the private one authenticates with
/// `{"op":"auth","args":[key, expires, signature]}` where the signature covers
/// `GET/realtime{expires}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitCodec;

impl BybitCodec {
    fn decode_push(&self, push: BybitWsPush) -> Result<Vec<StreamEvent>, ExchangeError> {
        let topic = push.topic.as_str();

        if topic.starts_with("tickers.") {
            let ticker: BybitWsTicker = parse(push.data)?;
            let ticker = convert_ws_ticker(&ticker, push.ts);
            return Ok(vec![StreamEvent::new(
                Some(ticker.symbol.clone()),
                StreamPayload::Ticker(ticker),
            )]);
        }

        if topic.starts_with("publicTrade.") {
            let raw: Vec<BybitWsTrade> = parse_items(push.data)?;
            let trades = raw
                .iter()
                .map(|t| convert_ws_trade(ENDPOINT, t))
                .collect::<Result<Vec<_>, _>>()?;
            let symbol = trades.first().map(|t| t.symbol.clone());
            return Ok(vec![StreamEvent::new(symbol, StreamPayload::Trades(trades))]);
        }

        if topic.starts_with("orderbook.") {
            let book: BybitWsOrderbook = parse(push.data)?;
            let delta = convert_ws_orderbook(ENDPOINT, &book, push.push_type.as_deref())?;
            return Ok(vec![StreamEvent::new(
                Some(delta.symbol.clone()),
                StreamPayload::OrderbookDelta(delta),
            )]);
        }

        match topic.split('.').next() {
            Some("order") => parse_items::<BybitWsOrder>(push.data)?
                .iter()
                .map(|o| {
                    let order = convert_ws_order(ENDPOINT, o)?;
                    Ok(StreamEvent::new(
                        Some(order.symbol.clone()),
                        StreamPayload::OrderUpdate(order),
                    ))
                })
                .collect(),
            Some("execution") => parse_items::<BybitWsExecution>(push.data)?
                .iter()
                .map(|e| {
                    let fill = convert_ws_execution(ENDPOINT, e)?;
                    Ok(StreamEvent::new(
                        Some(fill.symbol.clone()),
                        StreamPayload::Fill(fill),
                    ))
                })
                .collect(),
            _ => Err(ExchangeError::decode(
                ENDPOINT,
                format!("unknown topic '{}'", push.topic),
            )),
        }
    }
}

impl WsCodec for BybitCodec {
    fn encode_subscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError> {
        encode(&BybitWsRequest {
            op: "subscribe".to_string(),
            args: vec![Value::String(topic_name(key)?)],
        })
    }

    fn encode_unsubscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError> {
        encode(&BybitWsRequest {
            op: "unsubscribe".to_string(),
            args: vec![Value::String(topic_name(key)?)],
        })
    }

    fn encode_login(&self, signer: &dyn Signer, time_ms: u64) -> Result<Message, ExchangeError> {
        let expires = time_ms + AUTH_EXPIRY_MS;
        let signature = signer.sign(&format!("GET/realtime{}", expires))?;
        encode(&BybitWsRequest {
            op: "auth".to_string(),
            args: vec![
                Value::String(signer.api_key().to_string()),
                Value::from(expires),
                Value::String(signature),
            ],
        })
    }

    fn encode_ping(&self) -> Option<Message> {
        encode(&BybitWsRequest {
            op: "ping".to_string(),
            args: Vec::new(),
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

        let value: Value =
            serde_json::from_str(&text).map_err(|e| ExchangeError::decode(ENDPOINT, e))?;

        if value.get("topic").is_some() {
            return self.decode_push(parse(value)?);
        }

        if value.get("op").is_some() {
            let response: BybitWsResponse = parse(value)?;
            return Ok(match response.success {
                Some(false) => vec![StreamEvent::error(format!(
                    "{} failed: {}",
                    response.op, response.ret_msg
                ))],
                _ => Vec::new(),
            });
        }

        Err(ExchangeError::decode(ENDPOINT, "frame has neither topic nor op"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::{sign_hex, HmacSigner};
    use crate::core::types::{BookAction, OrderSide, OrderStatus, StreamEventKind};
    use rust_decimal_macros::dec;
    use secrecy::Secret;

    fn text(frame: &str) -> Message {
        Message::Text(frame.to_string())
    }

    fn frame_json(message: Message) -> Value {
        serde_json::from_str(&message.into_text().unwrap()).unwrap()
    }

    #[test]
    fn test_subscription_frames() {
        let key = SubscriptionKey::new(Topic::Orderbook, Some("BTCUSDT".into()));
        let frame = frame_json(BybitCodec.encode_subscription(&key).unwrap());
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["args"][0], "orderbook.50.BTCUSDT");

        let private = SubscriptionKey::new(Topic::Fills, None);
        let frame = frame_json(BybitCodec.encode_unsubscription(&private).unwrap());
        assert_eq!(frame["op"], "unsubscribe");
        assert_eq!(frame["args"][0], "execution");
    }

    #[test]
    fn test_public_topic_without_symbol_is_rejected() {
        let key = SubscriptionKey::new(Topic::Trades, None);
        assert!(BybitCodec.encode_subscription(&key).is_err());
    }

    #[test]
    fn test_auth_frame() {
        let signer = HmacSigner::new(Secret::new("key".into()), Secret::new("secret".into()));
        let frame = frame_json(BybitCodec.encode_login(&signer, 1_000).unwrap());
        assert_eq!(frame["op"], "auth");
        assert_eq!(frame["args"][0], "key");
        assert_eq!(frame["args"][1], 11_000);
        assert_eq!(
            frame["args"][2],
            sign_hex("secret", "GET/realtime11000").unwrap().as_str()
        );
    }

    #[test]
    fn test_decode_ticker() {
        let events = BybitCodec
            .decode_message(text(
                r#"{"topic":"tickers.BTCUSDT","type":"snapshot","ts":1673853746003,"data":{"symbol":"BTCUSDT","lastPrice":"21109.77","bid1Price":"21109.5","ask1Price":"21110.1"}}"#,
            ))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].symbol.as_deref(), Some("BTCUSDT"));
        match &events[0].payload {
            StreamPayload::Ticker(t) => {
                assert_eq!(t.last, Some(dec!(21109.77)));
                assert_eq!(t.bid, Some(dec!(21109.5)));
                assert!(t.mark.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_trades_batch() {
        let events = BybitCodec
            .decode_message(text(
                r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1672304486868,"data":[{"T":1672304486865,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"16578.50","i":"a1"},{"T":1672304486866,"s":"BTCUSDT","S":"Sell","v":"0.002","p":"16578.00","i":"a2"}]}"#,
            ))
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            StreamPayload::Trades(trades) => {
                assert_eq!(trades.len(), 2);
                assert_eq!(trades[1].side, OrderSide::Sell);
                assert_eq!(trades[0].price, dec!(16578.50));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_orderbook_snapshot() {
        let events = BybitCodec
            .decode_message(text(
                r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1672304484978,"data":{"s":"BTCUSDT","b":[["16493.50","0.006"]],"a":[["16611.00","0.029"]],"u":18521288,"seq":7961638724}}"#,
            ))
            .unwrap();
        match &events[0].payload {
            StreamPayload::OrderbookDelta(book) => {
                assert_eq!(book.action, BookAction::Snapshot);
                assert_eq!(book.bids[0].size, dec!(0.006));
                assert_eq!(book.sequence, Some(18521288));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_order_batch_yields_one_event_per_order() {
        let events = BybitCodec
            .decode_message(text(
                r#"{"topic":"order","creationTime":1672364262474,"data":[
                    {"orderId":"1","orderLinkId":"","symbol":"BTCUSDT","side":"Buy","orderType":"Limit","price":"16000","qty":"0.1","cumExecQty":"0","leavesQty":"0.1","orderStatus":"New","timeInForce":"GTC","createdTime":"1672364262444"},
                    {"orderId":"2","orderLinkId":"mine","symbol":"ETHUSDT","side":"Sell","orderType":"Market","price":"0","qty":"1","cumExecQty":"1","leavesQty":"0","orderStatus":"Filled","timeInForce":"IOC","createdTime":"1672364262445"}
                ]}"#,
            ))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].symbol.as_deref(), Some("BTCUSDT"));
        match &events[1].payload {
            StreamPayload::OrderUpdate(order) => {
                assert_eq!(order.status, OrderStatus::Filled);
                assert_eq!(order.client_id.as_deref(), Some("mine"));
                assert!(order.price.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_execution() {
        let events = BybitCodec
            .decode_message(text(
                r#"{"topic":"execution","data":[{"orderId":"1","execId":"e1","symbol":"BTCUSDT","side":"Buy","execPrice":"16000","execQty":"0.05","execFee":"0.0001","feeCurrency":"BTC","execTime":"1672364262474"}]}"#,
            ))
            .unwrap();
        assert_eq!(events[0].kind(), StreamEventKind::Fill);
    }

    #[test]
    fn test_acks_are_swallowed_and_failures_surface() {
        let ack = BybitCodec
            .decode_message(text(r#"{"success":true,"ret_msg":"","op":"subscribe","conn_id":"x"}"#))
            .unwrap();
        assert!(ack.is_empty());

        let pong = BybitCodec
            .decode_message(text(r#"{"success":true,"ret_msg":"pong","op":"ping"}"#))
            .unwrap();
        assert!(pong.is_empty());

        let failed = BybitCodec
            .decode_message(text(r#"{"success":false,"ret_msg":"Params Error","op":"auth"}"#))
            .unwrap();
        assert_eq!(failed[0].kind(), StreamEventKind::Error);
    }

    #[test]
    fn test_unknown_topic_is_a_decode_error() {
        let err = BybitCodec
            .decode_message(text(r#"{"topic":"kline.1.BTCUSDT","data":[]}"#))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Decode { .. }));
    }

    #[test]
    fn test_binary_frames_are_not_dropped_silently() {
        let err = BybitCodec
            .decode_message(Message::Binary(b"\x01\x02".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Decode { .. }));

        let ping = BybitCodec.decode_message(Message::Ping(Vec::new())).unwrap();
        assert!(ping.is_empty());
    }
}
