use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::traits::FundsTransfer;
use crate::core::types::DepositAddress;
use crate::exchanges::bybit::conversions::convert_deposit_chain;
use crate::exchanges::bybit::rest::BybitRestClient;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, instrument};

/// Deposit and withdrawal operations for Bybit
pub struct Funds<R: RestClient> {
    rest: BybitRestClient<R>,
}

impl<R: RestClient + Clone> Funds<R> {
    pub fn new(rest: &BybitRestClient<R>) -> Self {
        Self { rest: rest.clone() }
    }
}

#[async_trait]
impl<R: RestClient> FundsTransfer for Funds<R> {
    /// `network` matches either the chain name or the chain type, ignoring case.
    #[instrument(skip(self), fields(exchange = "bybit"))]
    async fn get_deposit_address(
        &self,
        coin: &str,
        network: &str,
    ) -> Result<DepositAddress, ExchangeError> {
        let addresses = self.rest.get_deposit_addresses(&coin.to_uppercase()).await?;

        let chain = if network.is_empty() {
            addresses.chains.first()
        } else {
            addresses.chains.iter().find(|c| {
                c.chain.eq_ignore_ascii_case(network) || c.chain_type.eq_ignore_ascii_case(network)
            })
        };

        chain
            .map(|c| convert_deposit_chain(&addresses.coin, c))
            .ok_or_else(|| {
                ExchangeError::InvalidParameters(format!(
                    "no deposit address for {} on network '{}'",
                    coin, network
                ))
            })
    }

    // address is kept out of the span
    #[instrument(skip(self, address), fields(exchange = "bybit"))]
    async fn withdraw(
        &self,
        coin: &str,
        amount: Decimal,
        address: &str,
        network: &str,
    ) -> Result<String, ExchangeError> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidParameters(format!(
                "withdrawal amount must be positive, got {}",
                amount
            )));
        }

        let result = self
            .rest
            .withdraw(&coin.to_uppercase(), &amount.to_string(), address, network)
            .await?;
        info!(withdrawal_id = %result.id, "withdrawal submitted");
        Ok(result.id)
    }
}
