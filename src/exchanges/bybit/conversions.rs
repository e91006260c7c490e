use crate::core::{
    errors::ExchangeError,
    types::{
        Balance, BookAction, BookLevel, DepositAddress, Fill, Order, OrderSide, OrderStatus,
        OrderType, OrderbookDelta, PlaceOrderParams, Position, PositionSide, PriceFilter, Ticker,
        TimeInForce, Trade,
    },
};
use crate::exchanges::bybit::types::{
    BybitDepositChain, BybitPerpBalance, BybitPerpOrder, BybitPerpOrderRequest,
    BybitPerpPosition, BybitSpotBalance, BybitSpotOrder, BybitSpotOrderRequest, BybitSymbolInfo,
    BybitWsExecution, BybitWsOrder, BybitWsOrderbook, BybitWsTicker, BybitWsTrade,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

fn invalid(endpoint: &str, what: &str, value: &str) -> ExchangeError {
    ExchangeError::decode(endpoint, format!("unexpected {} '{}'", what, value))
}

/// Convert core order side to the wire value shared by spot and derivatives
pub fn order_side_to_bybit(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

pub fn parse_order_side(endpoint: &str, side: &str) -> Result<OrderSide, ExchangeError> {
    match side.to_ascii_lowercase().as_str() {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        _ => Err(invalid(endpoint, "order side", side)),
    }
}

pub fn parse_order_type(endpoint: &str, order_type: &str) -> Result<OrderType, ExchangeError> {
    match order_type.to_ascii_lowercase().as_str() {
        "limit" | "limit_maker" => Ok(OrderType::Limit),
        "market" => Ok(OrderType::Market),
        _ => Err(invalid(endpoint, "order type", order_type)),
    }
}

/// Both spellings are accepted: `GTC` (spot) and `GoodTillCancel` (derivatives).
pub fn parse_time_in_force(value: &str) -> Option<TimeInForce> {
    match value {
        "GTC" | "GoodTillCancel" => Some(TimeInForce::GTC),
        "IOC" | "ImmediateOrCancel" => Some(TimeInForce::IOC),
        "FOK" | "FillOrKill" => Some(TimeInForce::FOK),
        "PostOnly" | "MAKER" => Some(TimeInForce::PostOnly),
        _ => None,
    }
}

/// Order status across spot (`PARTIALLY_FILLED`) and derivatives (`PartiallyFilled`).
pub fn parse_order_status(endpoint: &str, status: &str) -> Result<OrderStatus, ExchangeError> {
    let normalized: String = status
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_uppercase();

    match normalized.as_str() {
        "NEW" | "CREATED" | "PENDINGNEW" | "UNTRIGGERED" | "TRIGGERED" | "ACTIVE"
        | "PENDINGCANCEL" => Ok(OrderStatus::New),
        "PARTIALLYFILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "CANCELLED" | "DEACTIVATED" | "PARTIALLYFILLEDCANCELED" => {
            Ok(OrderStatus::Cancelled)
        }
        "REJECTED" => Ok(OrderStatus::Rejected),
        _ => Err(invalid(endpoint, "order status", status)),
    }
}

/// Millisecond epoch to UTC time.
pub fn millis_to_datetime(millis: Decimal) -> Option<DateTime<Utc>> {
    millis
        .trunc()
        .to_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn parse_rfc3339(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| !v.is_zero())
}

pub fn convert_spot_order(endpoint: &str, order: &BybitSpotOrder) -> Result<Order, ExchangeError> {
    let filled = order.executed_qty.unwrap_or_default();
    Ok(Order {
        id: order.order_id.clone(),
        client_id: non_empty(&order.order_link_id),
        symbol: order.symbol.clone(),
        side: parse_order_side(endpoint, &order.side)?,
        order_type: parse_order_type(endpoint, &order.order_type)?,
        price: positive(order.price),
        size: order.orig_qty,
        filled_size: filled,
        remaining_size: (order.orig_qty - filled).max(Decimal::ZERO),
        status: parse_order_status(endpoint, &order.status)?,
        time_in_force: order.time_in_force.as_deref().and_then(parse_time_in_force),
        created_at: order
            .time
            .or(order.transact_time)
            .and_then(millis_to_datetime),
    })
}

pub fn convert_perp_order(endpoint: &str, order: &BybitPerpOrder) -> Result<Order, ExchangeError> {
    let filled = order.cum_exec_qty.unwrap_or_default();
    Ok(Order {
        id: order.order_id.clone(),
        client_id: non_empty(&order.order_link_id),
        symbol: order.symbol.clone(),
        side: parse_order_side(endpoint, &order.side)?,
        order_type: parse_order_type(endpoint, &order.order_type)?,
        price: positive(order.price),
        size: order.qty,
        filled_size: filled,
        remaining_size: order
            .leaves_qty
            .unwrap_or_else(|| (order.qty - filled).max(Decimal::ZERO)),
        status: parse_order_status(endpoint, &order.order_status)?,
        time_in_force: order.time_in_force.as_deref().and_then(parse_time_in_force),
        created_at: parse_rfc3339(order.created_at.as_deref()),
    })
}

pub fn convert_spot_balance(balance: &BybitSpotBalance) -> Balance {
    Balance {
        coin: balance.coin.clone(),
        free: balance.free,
        locked: balance.locked,
        total: balance.total,
    }
}

/// Derivative wallets report wallet and available balance; the difference is margin in use.
pub fn convert_perp_balance(coin: &str, balance: &BybitPerpBalance) -> Balance {
    Balance {
        coin: coin.to_string(),
        free: balance.available_balance,
        locked: (balance.wallet_balance - balance.available_balance).max(Decimal::ZERO),
        total: balance.wallet_balance,
    }
}

pub fn convert_perp_position(position: &BybitPerpPosition) -> Position {
    let side = match position.side.as_str() {
        _ if position.size.is_zero() => PositionSide::Flat,
        "Buy" => PositionSide::Long,
        "Sell" => PositionSide::Short,
        _ => PositionSide::Flat,
    };

    Position {
        symbol: position.symbol.clone(),
        side,
        size: position.size,
        entry_price: position.entry_price.unwrap_or_default(),
        unrealized_pnl: position.unrealised_pnl.unwrap_or_default(),
        realized_pnl: position.realised_pnl.unwrap_or_default(),
        liquidation_price: positive(position.liq_price),
    }
}

pub fn convert_price_filter(info: &BybitSymbolInfo) -> PriceFilter {
    PriceFilter {
        symbol: info.name.clone(),
        min_price: info.price_filter.min_price.unwrap_or_default(),
        max_price: info.price_filter.max_price,
        tick_size: info.price_filter.tick_size,
    }
}

pub fn convert_deposit_chain(coin: &str, chain: &BybitDepositChain) -> DepositAddress {
    DepositAddress {
        coin: coin.to_string(),
        chain: chain.chain.clone(),
        address: chain.address_deposit.clone(),
        tag: non_empty(&chain.tag_deposit),
    }
}

/// Spot order request. Post-only maps to the `LIMIT_MAKER` order type.
pub fn spot_order_request(params: &PlaceOrderParams) -> BybitSpotOrderRequest {
    let post_only = params.time_in_force == Some(TimeInForce::PostOnly);
    let order_type = match params.order_type {
        OrderType::Limit if post_only => "LIMIT_MAKER",
        OrderType::Limit => "LIMIT",
        OrderType::Market => "MARKET",
    };
    let time_in_force = match params.time_in_force {
        Some(TimeInForce::GTC) => Some("GTC"),
        Some(TimeInForce::IOC) => Some("IOC"),
        Some(TimeInForce::FOK) => Some("FOK"),
        Some(TimeInForce::PostOnly) | None => None,
    };

    BybitSpotOrderRequest {
        symbol: params.symbol.concat(),
        qty: params.size.to_string(),
        side: order_side_to_bybit(params.side).to_string(),
        order_type: order_type.to_string(),
        time_in_force: time_in_force.map(str::to_string),
        price: match params.order_type {
            OrderType::Limit => params.price.map(|p| p.to_string()),
            OrderType::Market => None,
        },
        order_link_id: params.client_id.clone(),
    }
}

pub fn perp_order_request(params: &PlaceOrderParams) -> BybitPerpOrderRequest {
    let time_in_force = match params.time_in_force.unwrap_or(TimeInForce::GTC) {
        TimeInForce::GTC => "GoodTillCancel",
        TimeInForce::IOC => "ImmediateOrCancel",
        TimeInForce::FOK => "FillOrKill",
        TimeInForce::PostOnly => "PostOnly",
    };

    BybitPerpOrderRequest {
        side: order_side_to_bybit(params.side).to_string(),
        symbol: params.symbol.concat(),
        order_type: match params.order_type {
            OrderType::Limit => "Limit",
            OrderType::Market => "Market",
        }
        .to_string(),
        qty: params.size.to_string(),
        price: match params.order_type {
            OrderType::Limit => params.price.map(|p| p.to_string()),
            OrderType::Market => None,
        },
        time_in_force: time_in_force.to_string(),
        reduce_only: params.reduce_only,
        close_on_trigger: false,
        order_link_id: params.client_id.clone(),
    }
}

// Stream payloads

pub fn convert_ws_ticker(ticker: &BybitWsTicker, ts: Option<i64>) -> Ticker {
    Ticker {
        symbol: ticker.symbol.clone(),
        bid: ticker.bid1_price,
        ask: ticker.ask1_price,
        last: ticker.last_price,
        mark: ticker.mark_price,
        time: ts.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
    }
}

pub fn convert_ws_trade(endpoint: &str, trade: &BybitWsTrade) -> Result<Trade, ExchangeError> {
    Ok(Trade {
        id: trade.trade_id.clone(),
        symbol: trade.symbol.clone(),
        side: parse_order_side(endpoint, &trade.side)?,
        price: trade.price,
        size: trade.size,
        time: Utc.timestamp_millis_opt(trade.time).single(),
    })
}

fn parse_levels(endpoint: &str, levels: &[[String; 2]]) -> Result<Vec<BookLevel>, ExchangeError> {
    levels
        .iter()
        .map(|[price, size]| {
            Ok(BookLevel {
                price: Decimal::from_str(price)
                    .map_err(|_| invalid(endpoint, "book price", price))?,
                size: Decimal::from_str(size).map_err(|_| invalid(endpoint, "book size", size))?,
            })
        })
        .collect()
}

pub fn convert_ws_orderbook(
    endpoint: &str,
    book: &BybitWsOrderbook,
    push_type: Option<&str>,
) -> Result<OrderbookDelta, ExchangeError> {
    let action = match push_type {
        Some("snapshot") => BookAction::Snapshot,
        Some("delta") => BookAction::Update,
        other => return Err(invalid(endpoint, "book push type", other.unwrap_or(""))),
    };

    Ok(OrderbookDelta {
        symbol: book.symbol.clone(),
        action,
        bids: parse_levels(endpoint, &book.bids)?,
        asks: parse_levels(endpoint, &book.asks)?,
        sequence: book.update_id,
        checksum: None,
    })
}

pub fn convert_ws_order(endpoint: &str, order: &BybitWsOrder) -> Result<Order, ExchangeError> {
    let filled = order.cum_exec_qty.unwrap_or_default();
    Ok(Order {
        id: order.order_id.clone(),
        client_id: non_empty(&order.order_link_id),
        symbol: order.symbol.clone(),
        side: parse_order_side(endpoint, &order.side)?,
        order_type: parse_order_type(endpoint, &order.order_type)?,
        price: positive(order.price),
        size: order.qty,
        filled_size: filled,
        remaining_size: order
            .leaves_qty
            .unwrap_or_else(|| (order.qty - filled).max(Decimal::ZERO)),
        status: parse_order_status(endpoint, &order.order_status)?,
        time_in_force: order.time_in_force.as_deref().and_then(parse_time_in_force),
        created_at: order.created_time.and_then(millis_to_datetime),
    })
}

pub fn convert_ws_execution(
    endpoint: &str,
    execution: &BybitWsExecution,
) -> Result<Fill, ExchangeError> {
    Ok(Fill {
        order_id: execution.order_id.clone(),
        trade_id: execution.exec_id.clone(),
        symbol: execution.symbol.clone(),
        side: parse_order_side(endpoint, &execution.side)?,
        price: execution.exec_price,
        size: execution.exec_qty,
        fee: execution.exec_fee,
        fee_currency: execution.fee_currency.clone(),
        time: execution.exec_time.and_then(millis_to_datetime),
    })
}
