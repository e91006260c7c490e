use crate::exchanges::serde_decimal::{flexible_decimal, flexible_decimal_opt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound control frame: `{"op": "subscribe", "channel": "trades", "market": "BTC-PERP"}`.
#[derive(Debug, Clone, Serialize)]
pub struct FtxWsRequest {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
}

/// `{"op": "login", "args": {"key": "...", "sign": "...", "time": 1111}}`
#[derive(Debug, Clone, Serialize)]
pub struct FtxLoginRequest {
    pub op: String,
    pub args: FtxLoginArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct FtxLoginArgs {
    pub key: String,
    pub sign: String,
    pub time: u64,
}

/// Every inbound frame. `type` tells data (`partial`/`update`) from control frames.
#[derive(Debug, Clone, Deserialize)]
pub struct FtxWsMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtxTicker {
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub bid: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub ask: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub last: Option<Decimal>,
    /// Epoch seconds with fractional part.
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub time: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtxTrade {
    pub id: Option<i64>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub size: Decimal,
    pub side: String,
    #[serde(default)]
    pub liquidation: bool,
    pub time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtxOrderbook {
    pub action: String,
    #[serde(default)]
    pub bids: Vec<[Value; 2]>,
    #[serde(default)]
    pub asks: Vec<[Value; 2]>,
    pub checksum: Option<i64>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub time: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtxOrder {
    pub id: i64,
    pub client_id: Option<String>,
    pub market: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub size: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub filled_size: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub remaining_size: Decimal,
    pub status: String,
    #[serde(default)]
    pub ioc: bool,
    #[serde(default)]
    pub post_only: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtxFill {
    pub id: Option<i64>,
    pub order_id: i64,
    pub trade_id: Option<i64>,
    pub market: String,
    pub side: String,
    #[serde(deserialize_with = "flexible_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub fee: Option<Decimal>,
    pub fee_currency: Option<String>,
    pub time: Option<String>,
}
