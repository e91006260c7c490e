use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::traits::OrderPlacer;
use crate::core::types::{MarketKind, Order, OrderRef, PlaceOrderParams};
use crate::exchanges::bybit::conversions::{
    convert_perp_order, convert_spot_order, perp_order_request, spot_order_request,
};
use crate::exchanges::bybit::rest::{endpoints, BybitRestClient};
use async_trait::async_trait;
use tracing::{info, instrument};

/// Trading implementation for Bybit
pub struct Trading<R: RestClient> {
    rest: BybitRestClient<R>,
}

impl<R: RestClient + Clone> Trading<R> {
    pub fn new(rest: &BybitRestClient<R>) -> Self {
        Self { rest: rest.clone() }
    }
}

#[async_trait]
impl<R: RestClient> OrderPlacer for Trading<R> {
    #[instrument(skip(self, params), fields(exchange = "bybit", symbol = %params.symbol, market = %params.market))]
    async fn place_order(&self, params: PlaceOrderParams) -> Result<Order, ExchangeError> {
        params.validate()?;

        let order = match params.market {
            MarketKind::Spot => {
                let response = self.rest.place_spot_order(&spot_order_request(&params)).await?;
                convert_spot_order(endpoints::SPOT_ORDER, &response)?
            }
            MarketKind::Perp => {
                let response = self.rest.place_perp_order(&perp_order_request(&params)).await?;
                convert_perp_order(endpoints::PERP_ORDER_CREATE, &response)?
            }
        };

        info!(order_id = %order.id, status = ?order.status, "order placed");
        Ok(order)
    }

    #[instrument(skip(self), fields(exchange = "bybit", order_id = %order.order_id))]
    async fn cancel_order(&self, order: &OrderRef) -> Result<bool, ExchangeError> {
        match order.market {
            MarketKind::Spot => self.rest.cancel_spot_order(&order.order_id).await?,
            MarketKind::Perp => {
                self.rest
                    .cancel_perp_order(&order.symbol.concat(), &order.order_id)
                    .await?
            }
        };
        Ok(true)
    }

    /// Derivative orders are looked up in the symbol's order list.
    #[instrument(skip(self), fields(exchange = "bybit", order_id = %order.order_id))]
    async fn get_order(&self, order: &OrderRef) -> Result<Order, ExchangeError> {
        match order.market {
            MarketKind::Spot => {
                let response = self.rest.get_spot_order(&order.order_id).await?;
                convert_spot_order(endpoints::SPOT_ORDER, &response)
            }
            MarketKind::Perp => {
                let list = self.rest.get_perp_orders(&order.symbol.concat()).await?;
                let found = list
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .find(|o| o.order_id == order.order_id)
                    .ok_or_else(|| {
                        ExchangeError::InvalidParameters(format!(
                            "order {} not found for {}",
                            order.order_id, order.symbol
                        ))
                    })?;
                convert_perp_order(endpoints::PERP_ORDER_LIST, &found)
            }
        }
    }
}
