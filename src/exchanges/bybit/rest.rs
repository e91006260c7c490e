use crate::core::config::DEFAULT_RECV_GUARD_MS;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    canonicalize, signed_timestamp, RestClient, RestRequest, SignaturePlacement, Signer,
};
use crate::exchanges::bybit::types::{
    BybitApiResponse, BybitDepositAddresses, BybitPerpOrder, BybitPerpOrderList,
    BybitPerpOrderRequest, BybitPerpPosition, BybitPerpTicker, BybitPerpWallet,
    BybitSpotBalances, BybitSpotBookTicker, BybitSpotOrder, BybitSpotOrderRequest,
    BybitSymbolInfo, BybitWithdrawResult,
};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, instrument, trace};

pub mod endpoints {
    pub const SERVER_TIME: &str = "/v2/public/time";
    pub const PERP_TICKERS: &str = "/v2/public/tickers";
    pub const PERP_SYMBOLS: &str = "/v2/public/symbols";
    pub const SPOT_BOOK_TICKER: &str = "/spot/quote/v1/ticker/book_ticker";
    pub const SPOT_ORDER: &str = "/spot/v1/order";
    pub const SPOT_BALANCE: &str = "/spot/v1/account";
    pub const PERP_BALANCE: &str = "/v2/private/wallet/balance";
    pub const PERP_ORDER_LIST: &str = "/v2/private/order/list";
    pub const PERP_ORDER_CREATE: &str = "/v2/private/order/create";
    pub const PERP_ORDER_CANCEL: &str = "/v2/private/order/cancel";
    pub const PERP_POSITION: &str = "/v2/private/position/list";
    pub const DEPOSIT_ADDRESS: &str = "/asset/v1/private/deposit/address";
    pub const WITHDRAW: &str = "/asset/v1/private/withdraw";
}

type Params = BTreeMap<String, String>;

fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Flatten a request struct into signable string parameters.
pub fn to_params<T: Serialize>(endpoint: &str, request: &T) -> Result<Params, ExchangeError> {
    let value = serde_json::to_value(request)
        .map_err(|e| ExchangeError::InvalidParameters(format!("{}: {}", endpoint, e)))?;
    let Value::Object(map) = value else {
        return Err(ExchangeError::InvalidParameters(format!(
            "{}: request must be an object",
            endpoint
        )));
    };

    Ok(map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, text)
        })
        .collect())
}

/// Check the status sentinel, then decode `result`.
///
/// A rejected envelope never yields partial data, whatever its `result` holds.
pub fn decode_envelope<T: DeserializeOwned>(
    endpoint: &str,
    body: &str,
) -> Result<(T, Option<Decimal>), ExchangeError> {
    let envelope: BybitApiResponse<Value> =
        serde_json::from_str(body).map_err(|e| ExchangeError::decode(endpoint, e))?;

    if !envelope.is_success() {
        error!(
            endpoint,
            code = envelope.ret_code,
            message = %envelope.ret_msg,
            "bybit rejected request"
        );
        return Err(ExchangeError::RemoteRejected {
            endpoint: endpoint.to_string(),
            code: envelope.ret_code,
            message: envelope.ret_msg,
        });
    }

    let result = serde_json::from_value(envelope.result.unwrap_or(Value::Null))
        .map_err(|e| ExchangeError::decode(endpoint, e))?;
    Ok((result, envelope.time_now))
}

/// Typed wrapper around `RestClient` for the Bybit spot, derivative and asset APIs.
///
/// Private calls fetch the server clock first and sign against it.
pub struct BybitRestClient<R: RestClient> {
    client: R,
    signer: Option<Arc<dyn Signer>>,
    recv_guard_ms: u64,
}

impl<R: RestClient + Clone> Clone for BybitRestClient<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            signer: self.signer.clone(),
            recv_guard_ms: self.recv_guard_ms,
        }
    }
}

impl<R: RestClient> BybitRestClient<R> {
    pub fn new(client: R) -> Self {
        Self {
            client,
            signer: None,
            recv_guard_ms: DEFAULT_RECV_GUARD_MS,
        }
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn with_recv_guard(mut self, guard_ms: u64) -> Self {
        self.recv_guard_ms = guard_ms;
        self
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    #[instrument(skip(self, params), fields(exchange = "bybit"))]
    async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Params,
    ) -> Result<T, ExchangeError> {
        let request = RestRequest::get(endpoint).with_query(canonicalize(&params));
        let body = self.client.execute(request).await?;
        decode_envelope(endpoint, &body).map(|(result, _)| result)
    }

    /// Build, sign and send a private request.
    ///
    /// The server clock is read immediately before signing; if that read fails the request
    /// is never sent.
    #[instrument(skip(self, params), fields(exchange = "bybit"))]
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Params,
        placement: SignaturePlacement,
    ) -> Result<T, ExchangeError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ExchangeError::Auth(format!("{} requires API credentials", endpoint))
        })?;

        let server_time = self.get_server_time().await.map_err(|e| {
            ExchangeError::Signing(format!("server time unavailable for {}: {}", endpoint, e))
        })?;
        let timestamp = signed_timestamp(server_time, self.recv_guard_ms)?;
        let signed = signer.sign_params(method, endpoint, params, timestamp, placement)?;
        trace!(timestamp, "signed request");

        let mut request = RestRequest::new(signed.method.clone(), endpoint)
            .with_query(signed.query_string());
        if let Some(body) = signed.json_body()? {
            request = request.with_body(body);
        }

        let body = self.client.execute(request).await?;
        decode_envelope(endpoint, &body).map(|(result, _)| result)
    }

    /// Exchange clock in seconds.
    pub async fn get_server_time(&self) -> Result<Decimal, ExchangeError> {
        let endpoint = endpoints::SERVER_TIME;
        let body = self.client.execute(RestRequest::get(endpoint)).await?;
        let (_, time_now): (Value, _) = decode_envelope(endpoint, &body)?;
        time_now.ok_or_else(|| ExchangeError::decode(endpoint, "missing time_now"))
    }

    pub async fn get_perp_tickers(&self, symbol: &str) -> Result<Vec<BybitPerpTicker>, ExchangeError> {
        self.public_get(endpoints::PERP_TICKERS, params([("symbol", symbol)]))
            .await
    }

    pub async fn get_perp_symbols(&self) -> Result<Vec<BybitSymbolInfo>, ExchangeError> {
        self.public_get(endpoints::PERP_SYMBOLS, Params::new()).await
    }

    pub async fn get_spot_book_ticker(
        &self,
        symbol: &str,
    ) -> Result<BybitSpotBookTicker, ExchangeError> {
        self.public_get(endpoints::SPOT_BOOK_TICKER, params([("symbol", symbol)]))
            .await
    }

    pub async fn get_spot_balances(&self) -> Result<BybitSpotBalances, ExchangeError> {
        self.signed(
            Method::GET,
            endpoints::SPOT_BALANCE,
            Params::new(),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn get_perp_wallet(&self) -> Result<BybitPerpWallet, ExchangeError> {
        self.signed(
            Method::GET,
            endpoints::PERP_BALANCE,
            Params::new(),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn get_spot_order(&self, order_id: &str) -> Result<BybitSpotOrder, ExchangeError> {
        self.signed(
            Method::GET,
            endpoints::SPOT_ORDER,
            params([("orderId", order_id)]),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn place_spot_order(
        &self,
        order: &BybitSpotOrderRequest,
    ) -> Result<BybitSpotOrder, ExchangeError> {
        let endpoint = endpoints::SPOT_ORDER;
        self.signed(
            Method::POST,
            endpoint,
            to_params(endpoint, order)?,
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn cancel_spot_order(&self, order_id: &str) -> Result<Value, ExchangeError> {
        self.signed(
            Method::DELETE,
            endpoints::SPOT_ORDER,
            params([("orderId", order_id)]),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn get_perp_orders(&self, symbol: &str) -> Result<BybitPerpOrderList, ExchangeError> {
        self.signed(
            Method::GET,
            endpoints::PERP_ORDER_LIST,
            params([("symbol", symbol)]),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn place_perp_order(
        &self,
        order: &BybitPerpOrderRequest,
    ) -> Result<BybitPerpOrder, ExchangeError> {
        let endpoint = endpoints::PERP_ORDER_CREATE;
        self.signed(
            Method::POST,
            endpoint,
            to_params(endpoint, order)?,
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn cancel_perp_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<Value, ExchangeError> {
        self.signed(
            Method::POST,
            endpoints::PERP_ORDER_CANCEL,
            params([("symbol", symbol), ("order_id", order_id)]),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn get_perp_position(&self, symbol: &str) -> Result<BybitPerpPosition, ExchangeError> {
        self.signed(
            Method::GET,
            endpoints::PERP_POSITION,
            params([("symbol", symbol)]),
            SignaturePlacement::Query,
        )
        .await
    }

    pub async fn get_deposit_addresses(
        &self,
        coin: &str,
    ) -> Result<BybitDepositAddresses, ExchangeError> {
        self.signed(
            Method::GET,
            endpoints::DEPOSIT_ADDRESS,
            params([("coin", coin)]),
            SignaturePlacement::Query,
        )
        .await
    }

    /// Withdrawals always leave from the spot wallet. The asset API wants the signature in
    /// the JSON body.
    pub async fn withdraw(
        &self,
        coin: &str,
        amount: &str,
        address: &str,
        chain: &str,
    ) -> Result<BybitWithdrawResult, ExchangeError> {
        self.signed(
            Method::POST,
            endpoints::WITHDRAW,
            params([
                ("coin", coin),
                ("amount", amount),
                ("address", address),
                ("chain", chain),
            ]),
            SignaturePlacement::Body,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::HmacSigner;
    use crate::testing::MockRest;
    use rust_decimal_macros::dec;
    use secrecy::Secret;

    const TIME: &str = r#"{"ret_code":0,"ret_msg":"OK","ext_code":"","time_now":"1000.000","result":{}}"#;

    fn signer() -> Arc<dyn Signer> {
        Arc::new(HmacSigner::new(
            Secret::new("key".to_string()),
            Secret::new("s3cr3t".to_string()),
        ))
    }

    #[test]
    fn test_to_params_flattens_scalars() {
        let request = BybitPerpOrderRequest {
            side: "Buy".into(),
            symbol: "BTCUSD".into(),
            order_type: "Limit".into(),
            qty: "1.000".into(),
            price: None,
            time_in_force: "GoodTillCancel".into(),
            reduce_only: false,
            close_on_trigger: false,
            order_link_id: None,
        };
        let flat = to_params("t", &request).unwrap();
        assert_eq!(flat["qty"], "1.000");
        assert_eq!(flat["reduce_only"], "false");
        assert!(!flat.contains_key("price"));
    }

    #[test]
    fn test_rejected_envelope_is_not_decoded() {
        let body = r#"{"ret_code":10003,"ret_msg":"invalid api_key","result":{"balances":[]}}"#;
        let err = decode_envelope::<BybitSpotBalances>("/spot/v1/account", body).unwrap_err();
        match err {
            ExchangeError::RemoteRejected { code, message, .. } => {
                assert_eq!(code, 10003);
                assert_eq!(message, "invalid api_key");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_time_is_exact() {
        let rest = MockRest::new().respond(endpoints::SERVER_TIME, TIME);
        let client = BybitRestClient::new(rest);
        assert_eq!(client.get_server_time().await.unwrap(), dec!(1000.000));
    }

    #[tokio::test]
    async fn test_private_call_without_signer_fails() {
        let client = BybitRestClient::new(MockRest::new());
        let err = client.get_spot_balances().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_server_time_failure_aborts_signed_call() {
        let rest = MockRest::new().fail(endpoints::SERVER_TIME, "timeout");
        let client = BybitRestClient::new(rest.clone()).with_signer(signer());

        let err = client.get_spot_balances().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Signing(_)));
        assert!(rest.requests_to(endpoints::SPOT_BALANCE).is_empty());
    }

    #[tokio::test]
    async fn test_query_signature_matches_sent_bytes() {
        let rest = MockRest::new()
            .respond(endpoints::SERVER_TIME, TIME)
            .respond(
                endpoints::SPOT_BALANCE,
                r#"{"ret_code":0,"ret_msg":"","result":{"balances":[]}}"#,
            );
        let client = BybitRestClient::new(rest.clone()).with_signer(signer());
        client.get_spot_balances().await.unwrap();

        let sent = rest.requests_to(endpoints::SPOT_BALANCE);
        let canonical = "api_key=key&timestamp=999900";
        let expected = crate::core::kernel::sign_hex("s3cr3t", canonical).unwrap();
        assert_eq!(sent[0].query, format!("{}&sign={}", canonical, expected));
        assert!(sent[0].body.is_none());
    }
}
