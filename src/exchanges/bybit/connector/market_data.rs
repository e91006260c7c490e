use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::traits::MarketDataSource;
use crate::core::types::{MarketKind, PriceFilter, Symbol};
use crate::exchanges::bybit::conversions::convert_price_filter;
use crate::exchanges::bybit::rest::{endpoints, BybitRestClient};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::instrument;

/// Market data operations for Bybit
pub struct MarketData<R: RestClient> {
    rest: BybitRestClient<R>,
}

impl<R: RestClient + Clone> MarketData<R> {
    pub fn new(rest: &BybitRestClient<R>) -> Self {
        Self { rest: rest.clone() }
    }
}

#[async_trait]
impl<R: RestClient> MarketDataSource for MarketData<R> {
    async fn get_server_time(&self) -> Result<Decimal, ExchangeError> {
        self.rest.get_server_time().await
    }

    #[instrument(skip(self), fields(exchange = "bybit", symbol = %symbol, market = %market))]
    async fn get_market_price(
        &self,
        symbol: &Symbol,
        market: MarketKind,
    ) -> Result<Decimal, ExchangeError> {
        let pair = symbol.concat();
        match market {
            MarketKind::Spot => {
                let ticker = self.rest.get_spot_book_ticker(&pair).await?;
                ticker
                    .bid_price
                    .ok_or_else(|| ExchangeError::decode(endpoints::SPOT_BOOK_TICKER, "no bid price"))
            }
            MarketKind::Perp => {
                let tickers = self.rest.get_perp_tickers(&pair).await?;
                let ticker = tickers
                    .into_iter()
                    .find(|t| t.symbol == pair)
                    .ok_or_else(|| ExchangeError::SymbolNotFound(pair.clone()))?;
                ticker
                    .mark_price
                    .ok_or_else(|| ExchangeError::decode(endpoints::PERP_TICKERS, "no mark price"))
            }
        }
    }

    #[instrument(skip(self), fields(exchange = "bybit", symbol = %symbol))]
    async fn get_price_filter(&self, symbol: &Symbol) -> Result<PriceFilter, ExchangeError> {
        let pair = symbol.concat();
        self.rest
            .get_perp_symbols()
            .await?
            .iter()
            .find(|info| info.name == pair)
            .map(convert_price_filter)
            .ok_or(ExchangeError::SymbolNotFound(pair))
    }
}
