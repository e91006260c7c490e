use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::traits::{AccountInfo, MarketDataSource};
use crate::core::types::{
    AccountValuation, Balance, MarketKind, Position, Symbol, UnpricedBalance,
};
use crate::exchanges::bybit::connector::market_data::MarketData;
use crate::exchanges::bybit::conversions::{
    convert_perp_balance, convert_perp_position, convert_spot_balance,
};
use crate::exchanges::bybit::rest::BybitRestClient;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{instrument, warn};

/// Balances valued at par with the dollar.
const USD_STABLES: [&str; 3] = ["USDT", "USD", "USDC"];

/// Quote currency used to price every other coin.
const VALUATION_QUOTE: &str = "USDT";

/// Account implementation for Bybit
pub struct Account<R: RestClient> {
    rest: BybitRestClient<R>,
    market: MarketData<R>,
}

impl<R: RestClient + Clone> Account<R> {
    pub fn new(rest: &BybitRestClient<R>) -> Self {
        Self {
            rest: rest.clone(),
            market: MarketData::new(rest),
        }
    }
}

impl<R: RestClient> Account<R> {
    /// USD value of `amount` of `coin`, or the reason it could not be priced.
    async fn usd_value(
        &self,
        coin: &str,
        amount: Decimal,
        market: MarketKind,
    ) -> Result<Decimal, String> {
        if USD_STABLES.contains(&coin) {
            return Ok(amount);
        }

        let symbol = Symbol::new(coin, VALUATION_QUOTE).map_err(|e| e.to_string())?;
        let price = self
            .market
            .get_market_price(&symbol, market)
            .await
            .map_err(|e| e.to_string())?;
        amount
            .checked_mul(price)
            .ok_or_else(|| format!("USD value of {} {} at {} is out of range", amount, coin, price))
    }
}

#[async_trait]
impl<R: RestClient> AccountInfo for Account<R> {
    async fn get_balance(&self, coin: &str, market: MarketKind) -> Result<Balance, ExchangeError> {
        let coin = coin.to_uppercase();
        Ok(self
            .get_all_balances(market)
            .await?
            .into_iter()
            .find(|b| b.coin == coin)
            .unwrap_or_else(|| Balance::zero(coin)))
    }

    #[instrument(skip(self), fields(exchange = "bybit", market = %market))]
    async fn get_all_balances(&self, market: MarketKind) -> Result<Vec<Balance>, ExchangeError> {
        match market {
            MarketKind::Spot => Ok(self
                .rest
                .get_spot_balances()
                .await?
                .balances
                .iter()
                .map(convert_spot_balance)
                .collect()),
            MarketKind::Perp => {
                let mut balances: Vec<Balance> = self
                    .rest
                    .get_perp_wallet()
                    .await?
                    .iter()
                    .map(|(coin, balance)| convert_perp_balance(coin, balance))
                    .collect();
                balances.sort_by(|a, b| a.coin.cmp(&b.coin));
                Ok(balances)
            }
        }
    }

    #[instrument(skip(self), fields(exchange = "bybit", symbol = %symbol))]
    async fn get_position(&self, symbol: &Symbol) -> Result<Position, ExchangeError> {
        let position = self.rest.get_perp_position(&symbol.concat()).await?;
        Ok(convert_perp_position(&position))
    }

    /// Sum of spot totals and derivative wallet balances in USD.
    ///
    /// Balance fetch failures fail the call. A coin whose price lookup fails, or whose value
    /// does not fit a `Decimal`, contributes nothing and is listed in `unpriced`.
    #[instrument(skip(self), fields(exchange = "bybit"))]
    async fn get_total_account_usd_value(&self) -> Result<AccountValuation, ExchangeError> {
        let spot = self.get_all_balances(MarketKind::Spot).await?;
        let perp = self.get_all_balances(MarketKind::Perp).await?;

        let mut total_usd = Decimal::ZERO;
        let mut unpriced = Vec::new();

        let held = spot
            .iter()
            .map(|b| (b, MarketKind::Spot))
            .chain(perp.iter().map(|b| (b, MarketKind::Perp)))
            .filter(|(b, _)| b.total > Decimal::ZERO);
        for (balance, market) in held {
            let valued = match self.usd_value(&balance.coin, balance.total, market).await {
                Ok(value) => total_usd
                    .checked_add(value)
                    .ok_or_else(|| "USD total is out of range".to_string()),
                Err(reason) => Err(reason),
            };
            match valued {
                Ok(total) => total_usd = total,
                Err(reason) => {
                    warn!(
                        coin = %balance.coin,
                        %market,
                        amount = %balance.total,
                        %reason,
                        "balance left out of USD valuation"
                    );
                    unpriced.push(UnpricedBalance {
                        coin: balance.coin.clone(),
                        market,
                        amount: balance.total,
                        reason,
                    });
                }
            }
        }

        Ok(AccountValuation {
            total_usd,
            unpriced,
        })
    }
}
