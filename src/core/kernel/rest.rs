use crate::core::errors::ExchangeError;
use crate::core::kernel::wait_for_shutdown;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use tokio::sync::watch;
use tracing::{instrument, trace};

/// A single HTTP call, already fully encoded.
///
/// The query string is sent as-is so that signed bytes and sent bytes never diverge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    pub method: Method,
    pub endpoint: String,
    pub query: String,
    pub body: Option<String>,
}

impl RestRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: String::new(),
            body: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }
}

/// REST client trait for making HTTP requests
///
/// Implementations only move bytes. Authentication and envelope handling belong to the
/// exchange adapters.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Execute the request and return the raw response body
    async fn execute(&self, request: RestRequest) -> Result<String, ExchangeError>;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: "unifex/0.1".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            shutdown: None,
        }
    }

    /// Abort in-flight requests once the receiver observes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| ExchangeError::transport(&self.config.base_url, e))?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            shutdown: self.shutdown,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone, Debug)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ReqwestRest {
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    fn build_url(&self, request: &RestRequest) -> String {
        if request.query.is_empty() {
            format!("{}{}", self.config.base_url, request.endpoint)
        } else {
            format!(
                "{}{}?{}",
                self.config.base_url, request.endpoint, request.query
            )
        }
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(
        &self,
        endpoint: &str,
        response: Response,
    ) -> Result<String, ExchangeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::transport(endpoint, e))?;

        trace!("Response body: {}", body);

        if status.is_success() {
            Ok(body)
        } else {
            Err(ExchangeError::RemoteRejected {
                endpoint: endpoint.to_string(),
                code: i64::from(status.as_u16()),
                message: body,
            })
        }
    }

    async fn send(&self, request: RestRequest) -> Result<String, ExchangeError> {
        let url = self.build_url(&request);
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(body) = request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ExchangeError::transport(&request.endpoint, e))?;

        self.handle_response(&request.endpoint, response).await
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    // query is skipped: it carries the api key and signature
    #[instrument(skip(self, request), fields(exchange = %self.config.exchange_name, method = %request.method, endpoint = %request.endpoint))]
    async fn execute(&self, request: RestRequest) -> Result<String, ExchangeError> {
        let Some(mut shutdown) = self.shutdown.clone() else {
            return self.send(request).await;
        };
        let stopped = *shutdown.borrow();
        if stopped {
            return Err(ExchangeError::Cancelled);
        }

        tokio::select! {
            result = self.send(request) => result,
            () = wait_for_shutdown(&mut shutdown) => Err(ExchangeError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(shutdown: Option<watch::Receiver<bool>>) -> ReqwestRest {
        let mut builder = RestClientBuilder::new(RestClientConfig::new(
            "http://127.0.0.1:9".to_string(),
            "test".to_string(),
        ));
        if let Some(rx) = shutdown {
            builder = builder.with_shutdown(rx);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_build_url_appends_query_verbatim() {
        let rest = client(None);
        let request = RestRequest::get("/v2/public/tickers").with_query("symbol=BTCUSD");
        assert_eq!(
            rest.build_url(&request),
            "http://127.0.0.1:9/v2/public/tickers?symbol=BTCUSD"
        );
        assert_eq!(
            rest.build_url(&RestRequest::get("/v2/public/time")),
            "http://127.0.0.1:9/v2/public/time"
        );
    }

    #[tokio::test]
    async fn test_execute_after_shutdown_is_cancelled() {
        let (tx, rx) = watch::channel(false);
        let rest = client(Some(rx));
        tx.send(true).unwrap();

        let result = rest.execute(RestRequest::get("/v2/public/time")).await;
        assert!(matches!(result, Err(ExchangeError::Cancelled)));
    }
}
