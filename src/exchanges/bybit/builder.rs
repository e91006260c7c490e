use crate::core::config::{Environment, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    HmacSigner, ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, Signer,
    TungsteniteWs,
};
use crate::exchanges::bybit::connector::BybitConnector;
use crate::exchanges::bybit::rest::BybitRestClient;
use secrecy::Secret;
use std::sync::Arc;
use tokio::sync::watch;

pub const TESTNET_URL: &str = "https://api-testnet.bybit.com";
pub const MAINNET_URL: &str = "https://api.bybit.com";
pub const MAINNET_ALT_URL: &str = "https://api.bytick.com";

/// REST host for an environment.
pub fn rest_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Testnet => TESTNET_URL,
        Environment::Mainnet => MAINNET_URL,
        Environment::MainnetAlt => MAINNET_ALT_URL,
    }
}

/// Public stream host for spot market data.
pub fn public_stream_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Testnet => "wss://stream-testnet.bybit.com/v5/public/spot",
        Environment::Mainnet => "wss://stream.bybit.com/v5/public/spot",
        Environment::MainnetAlt => "wss://stream.bytick.com/v5/public/spot",
    }
}

pub fn private_stream_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Testnet => "wss://stream-testnet.bybit.com/v5/private",
        Environment::Mainnet => "wss://stream.bybit.com/v5/private",
        Environment::MainnetAlt => "wss://stream.bytick.com/v5/private",
    }
}

/// Signer for the configured credentials, if any.
pub fn build_signer(config: &ExchangeConfig) -> Option<Arc<dyn Signer>> {
    config.has_credentials().then(|| {
        Arc::new(HmacSigner::new(
            Secret::new(config.api_key().to_string()),
            Secret::new(config.secret_key().to_string()),
        )) as Arc<dyn Signer>
    })
}

/// Wrap any transport in a configured Bybit client. Used directly with test transports.
pub fn connector_with_rest<R: RestClient + Clone>(
    rest: R,
    config: &ExchangeConfig,
) -> BybitConnector<R> {
    let mut client = BybitRestClient::new(rest).with_recv_guard(config.recv_guard_ms);
    if let Some(signer) = build_signer(config) {
        client = client.with_signer(signer);
    }
    BybitConnector::new(client)
}

fn build_rest(
    config: &ExchangeConfig,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<ReqwestRest, ExchangeError> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| rest_url(config.environment).to_string());

    let rest_config =
        RestClientConfig::new(base_url, "bybit".to_string()).with_timeout(config.request_timeout_secs);

    let mut builder = RestClientBuilder::new(rest_config);
    if let Some(shutdown) = shutdown {
        builder = builder.with_shutdown(shutdown);
    }
    builder.build()
}

/// Create a Bybit connector with REST-only support
pub fn build_connector(config: ExchangeConfig) -> Result<BybitConnector<ReqwestRest>, ExchangeError> {
    let rest = build_rest(&config, None)?;
    Ok(connector_with_rest(rest, &config))
}

/// Same as [`build_connector`], with in-flight requests aborted once `shutdown` fires.
pub fn build_cancellable_connector(
    config: ExchangeConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<BybitConnector<ReqwestRest>, ExchangeError> {
    let rest = build_rest(&config, Some(shutdown))?;
    Ok(connector_with_rest(rest, &config))
}

/// Unconnected public market-data socket.
pub fn public_ws(config: &ExchangeConfig) -> TungsteniteWs {
    TungsteniteWs::new(public_stream_url(config.environment).to_string(), "bybit".to_string())
}

/// Unconnected private account socket.
pub fn private_ws(config: &ExchangeConfig) -> TungsteniteWs {
    TungsteniteWs::new(private_stream_url(config.environment).to_string(), "bybit".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_selects_host() {
        assert_eq!(rest_url(Environment::Testnet), TESTNET_URL);
        assert_eq!(rest_url(Environment::MainnetAlt), "https://api.bytick.com");
        assert!(public_stream_url(Environment::Testnet).contains("testnet"));
    }

    #[test]
    fn test_build_connector_without_credentials() {
        let config = ExchangeConfig::read_only().testnet(true);
        assert!(build_signer(&config).is_none());
        assert!(build_connector(config).is_ok());
    }

    #[test]
    fn test_build_connector_honours_base_url_override() {
        let config = ExchangeConfig::new("k".into(), "s".into())
            .base_url("http://localhost:9999".into());
        let rest = build_rest(&config, None).unwrap();
        assert_eq!(rest.config().base_url, "http://localhost:9999");
        assert!(build_signer(&config).is_some());
    }
}
