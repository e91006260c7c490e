use crate::core::{
    errors::ExchangeError,
    types::{
        AccountValuation, Balance, DepositAddress, MarketKind, Order, OrderRef, PlaceOrderParams,
        Position, PriceFilter, Symbol,
    },
};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait MarketDataSource {
    /// Exchange clock in seconds, fractional part preserved.
    async fn get_server_time(&self) -> Result<Decimal, ExchangeError>;

    /// Best bid on spot, mark price on perpetuals.
    async fn get_market_price(
        &self,
        symbol: &Symbol,
        market: MarketKind,
    ) -> Result<Decimal, ExchangeError>;

    /// Fails with `SymbolNotFound` when the exchange does not list the symbol.
    async fn get_price_filter(&self, symbol: &Symbol) -> Result<PriceFilter, ExchangeError>;
}

#[async_trait]
pub trait OrderPlacer {
    async fn place_order(&self, params: PlaceOrderParams) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, order: &OrderRef) -> Result<bool, ExchangeError>;

    async fn get_order(&self, order: &OrderRef) -> Result<Order, ExchangeError>;
}

#[async_trait]
pub trait AccountInfo {
    /// Zero balance when the coin is absent from the snapshot.
    async fn get_balance(&self, coin: &str, market: MarketKind) -> Result<Balance, ExchangeError>;

    async fn get_all_balances(&self, market: MarketKind) -> Result<Vec<Balance>, ExchangeError>;

    async fn get_position(&self, symbol: &Symbol) -> Result<Position, ExchangeError>;

    /// Read-only aggregation over spot and derivative balances fetched at call time.
    async fn get_total_account_usd_value(&self) -> Result<AccountValuation, ExchangeError>;
}

#[async_trait]
pub trait FundsTransfer {
    /// An empty `network` selects the first chain the exchange reports.
    async fn get_deposit_address(
        &self,
        coin: &str,
        network: &str,
    ) -> Result<DepositAddress, ExchangeError>;

    /// Returns the exchange's withdrawal id.
    async fn withdraw(
        &self,
        coin: &str,
        amount: Decimal,
        address: &str,
        network: &str,
    ) -> Result<String, ExchangeError>;
}

pub trait ExchangeConnector:
    MarketDataSource + OrderPlacer + AccountInfo + FundsTransfer + Send + Sync
{
}

impl<T> ExchangeConnector for T where
    T: MarketDataSource + OrderPlacer + AccountInfo + FundsTransfer + Send + Sync
{
}
