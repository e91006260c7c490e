use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::traits::{AccountInfo, FundsTransfer, MarketDataSource, OrderPlacer};
use crate::core::types::{
    AccountValuation, Balance, DepositAddress, MarketKind, Order, OrderRef, PlaceOrderParams,
    Position, PriceFilter, Symbol,
};
use crate::exchanges::bybit::rest::BybitRestClient;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub mod account;
pub mod funds;
pub mod market_data;
pub mod trading;

pub use account::Account;
pub use funds::Funds;
pub use market_data::MarketData;
pub use trading::Trading;

/// Bybit connector that composes all sub-trait implementations
pub struct BybitConnector<R: RestClient> {
    pub market: MarketData<R>,
    pub trading: Trading<R>,
    pub account: Account<R>,
    pub funds: Funds<R>,
}

impl<R: RestClient + Clone> BybitConnector<R> {
    pub fn new(rest: BybitRestClient<R>) -> Self {
        Self {
            market: MarketData::new(&rest),
            trading: Trading::new(&rest),
            account: Account::new(&rest),
            funds: Funds::new(&rest),
        }
    }
}

// Implement traits for the connector by delegating to sub-components
#[async_trait]
impl<R: RestClient> MarketDataSource for BybitConnector<R> {
    async fn get_server_time(&self) -> Result<Decimal, ExchangeError> {
        self.market.get_server_time().await
    }

    async fn get_market_price(
        &self,
        symbol: &Symbol,
        market: MarketKind,
    ) -> Result<Decimal, ExchangeError> {
        self.market.get_market_price(symbol, market).await
    }

    async fn get_price_filter(&self, symbol: &Symbol) -> Result<PriceFilter, ExchangeError> {
        self.market.get_price_filter(symbol).await
    }
}

#[async_trait]
impl<R: RestClient> OrderPlacer for BybitConnector<R> {
    async fn place_order(&self, params: PlaceOrderParams) -> Result<Order, ExchangeError> {
        self.trading.place_order(params).await
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<bool, ExchangeError> {
        self.trading.cancel_order(order).await
    }

    async fn get_order(&self, order: &OrderRef) -> Result<Order, ExchangeError> {
        self.trading.get_order(order).await
    }
}

#[async_trait]
impl<R: RestClient> AccountInfo for BybitConnector<R> {
    async fn get_balance(&self, coin: &str, market: MarketKind) -> Result<Balance, ExchangeError> {
        self.account.get_balance(coin, market).await
    }

    async fn get_all_balances(&self, market: MarketKind) -> Result<Vec<Balance>, ExchangeError> {
        self.account.get_all_balances(market).await
    }

    async fn get_position(&self, symbol: &Symbol) -> Result<Position, ExchangeError> {
        self.account.get_position(symbol).await
    }

    async fn get_total_account_usd_value(&self) -> Result<AccountValuation, ExchangeError> {
        self.account.get_total_account_usd_value().await
    }
}

#[async_trait]
impl<R: RestClient> FundsTransfer for BybitConnector<R> {
    async fn get_deposit_address(
        &self,
        coin: &str,
        network: &str,
    ) -> Result<DepositAddress, ExchangeError> {
        self.funds.get_deposit_address(coin, network).await
    }

    async fn withdraw(
        &self,
        coin: &str,
        amount: Decimal,
        address: &str,
        network: &str,
    ) -> Result<String, ExchangeError> {
        self.funds.withdraw(coin, amount, address, network).await
    }
}
