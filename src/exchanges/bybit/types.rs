use crate::exchanges::serde_decimal::{flexible_decimal, flexible_decimal_opt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Envelope wrapping every Bybit REST response.
///
/// `time_now` is a string on most endpoints and a bare number on the asset endpoints.
#[derive(Debug, Deserialize)]
pub struct BybitApiResponse<T> {
    #[serde(default)]
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub ext_code: Option<String>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub time_now: Option<Decimal>,
    pub result: Option<T>,
}

impl<T> BybitApiResponse<T> {
    /// Spot endpoints answer with an empty message, derivative endpoints with `OK`.
    pub fn is_success(&self) -> bool {
        self.ret_code == 0 && (self.ret_msg.is_empty() || self.ret_msg.eq_ignore_ascii_case("ok"))
    }
}

// Market data

#[derive(Debug, Clone, Deserialize)]
pub struct BybitSpotBookTicker {
    pub symbol: Option<String>,
    #[serde(rename = "bidPrice", default, deserialize_with = "flexible_decimal_opt")]
    pub bid_price: Option<Decimal>,
    #[serde(rename = "bidQty", default, deserialize_with = "flexible_decimal_opt")]
    pub bid_qty: Option<Decimal>,
    #[serde(rename = "askPrice", default, deserialize_with = "flexible_decimal_opt")]
    pub ask_price: Option<Decimal>,
    #[serde(rename = "askQty", default, deserialize_with = "flexible_decimal_opt")]
    pub ask_qty: Option<Decimal>,
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitPerpTicker {
    pub symbol: String,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub mark_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub index_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub bid_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub ask_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub last_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitSymbolInfo {
    pub name: String,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
    pub price_filter: BybitPriceFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitPriceFilter {
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub min_price: Option<Decimal>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub max_price: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub tick_size: Decimal,
}

// Account

#[derive(Debug, Clone, Deserialize)]
pub struct BybitSpotBalances {
    #[serde(default)]
    pub balances: Vec<BybitSpotBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitSpotBalance {
    pub coin: String,
    #[serde(rename = "coinId")]
    pub coin_id: Option<String>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub total: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub free: Decimal,
    #[serde(deserialize_with = "flexible_decimal")]
    pub locked: Decimal,
}

/// Derivative wallet, keyed by coin.
pub type BybitPerpWallet = HashMap<String, BybitPerpBalance>;

#[derive(Debug, Clone, Deserialize)]
pub struct BybitPerpBalance {
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub equity: Option<Decimal>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub available_balance: Decimal,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub used_margin: Option<Decimal>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub wallet_balance: Decimal,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub realised_pnl: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub unrealised_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitPerpPosition {
    pub symbol: String,
    pub side: String,
    #[serde(deserialize_with = "flexible_decimal")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub entry_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub liq_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub realised_pnl: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub unrealised_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitDepositAddresses {
    pub coin: String,
    #[serde(default)]
    pub chains: Vec<BybitDepositChain>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitDepositChain {
    pub chain_type: String,
    pub address_deposit: String,
    #[serde(default)]
    pub tag_deposit: String,
    pub chain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWithdrawResult {
    pub id: String,
}

// Trading

/// Spot order as returned by create, query and cancel.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitSpotOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderLinkId", default)]
    pub order_link_id: String,
    pub symbol: String,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(rename = "origQty", deserialize_with = "flexible_decimal")]
    pub orig_qty: Decimal,
    #[serde(rename = "executedQty", default, deserialize_with = "flexible_decimal_opt")]
    pub executed_qty: Option<Decimal>,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub status: String,
    #[serde(rename = "timeInForce", default)]
    pub time_in_force: Option<String>,
    #[serde(rename = "transactTime", default, deserialize_with = "flexible_decimal_opt")]
    pub transact_time: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub time: Option<Decimal>,
}

/// Derivative order as returned by create, cancel and the order list.
///
/// Create and cancel send numbers where the list sends strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitPerpOrder {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub qty: Decimal,
    #[serde(default)]
    pub time_in_force: Option<String>,
    pub order_status: String,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub leaves_qty: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub cum_exec_qty: Option<Decimal>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitPerpOrderList {
    #[serde(default)]
    pub data: Option<Vec<BybitPerpOrder>>,
}

/// Derivative order request.
#[derive(Debug, Clone, Serialize)]
pub struct BybitPerpOrderRequest {
    pub side: String,
    pub symbol: String,
    pub order_type: String,
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub time_in_force: String,
    pub reduce_only: bool,
    pub close_on_trigger: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_link_id: Option<String>,
}

/// Spot order request.
#[derive(Debug, Clone, Serialize)]
pub struct BybitSpotOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(rename = "timeInForce", skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(rename = "orderLinkId", skip_serializing_if = "Option::is_none")]
    pub order_link_id: Option<String>,
}

// WebSocket (v5)

#[derive(Debug, Clone, Serialize)]
pub struct BybitWsRequest {
    pub op: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

/// Control response: subscribe, auth and pong acknowledgements.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsResponse {
    pub op: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub ret_msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsPush {
    pub topic: String,
    #[serde(rename = "type", default)]
    pub push_type: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsTicker {
    pub symbol: String,
    #[serde(rename = "bid1Price", default, deserialize_with = "flexible_decimal_opt")]
    pub bid1_price: Option<Decimal>,
    #[serde(rename = "ask1Price", default, deserialize_with = "flexible_decimal_opt")]
    pub ask1_price: Option<Decimal>,
    #[serde(rename = "lastPrice", default, deserialize_with = "flexible_decimal_opt")]
    pub last_price: Option<Decimal>,
    #[serde(rename = "markPrice", default, deserialize_with = "flexible_decimal_opt")]
    pub mark_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsTrade {
    #[serde(rename = "T")]
    pub time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "v", deserialize_with = "flexible_decimal")]
    pub size: Decimal,
    #[serde(rename = "p", deserialize_with = "flexible_decimal")]
    pub price: Decimal,
    #[serde(rename = "i")]
    pub trade_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsOrderbook {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
    #[serde(rename = "u")]
    pub update_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderLinkId", default)]
    pub order_link_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "orderType")]
    pub order_type: String,
    #[serde(default, deserialize_with = "flexible_decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(deserialize_with = "flexible_decimal")]
    pub qty: Decimal,
    #[serde(rename = "cumExecQty", default, deserialize_with = "flexible_decimal_opt")]
    pub cum_exec_qty: Option<Decimal>,
    #[serde(rename = "leavesQty", default, deserialize_with = "flexible_decimal_opt")]
    pub leaves_qty: Option<Decimal>,
    #[serde(rename = "orderStatus")]
    pub order_status: String,
    #[serde(rename = "timeInForce", default)]
    pub time_in_force: Option<String>,
    #[serde(rename = "createdTime", default, deserialize_with = "flexible_decimal_opt")]
    pub created_time: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsExecution {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "execId")]
    pub exec_id: Option<String>,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "execPrice", deserialize_with = "flexible_decimal")]
    pub exec_price: Decimal,
    #[serde(rename = "execQty", deserialize_with = "flexible_decimal")]
    pub exec_qty: Decimal,
    #[serde(rename = "execFee", default, deserialize_with = "flexible_decimal_opt")]
    pub exec_fee: Option<Decimal>,
    #[serde(rename = "feeCurrency", default)]
    pub fee_currency: Option<String>,
    #[serde(rename = "execTime", default, deserialize_with = "flexible_decimal_opt")]
    pub exec_time: Option<Decimal>,
}
