use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

/// WebSocket session trait - pure transport layer
///
/// `connect` may be called again after a failure to establish a fresh connection to the
/// same endpoint.
#[async_trait]
pub trait WsSession: Send {
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Next data frame. Transport pings are answered here and never surface.
    /// `None` means the peer closed the connection.
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    async fn close(&mut self) -> Result<(), ExchangeError>;

    fn is_connected(&self) -> bool;
}

/// Tungstenite-based WebSocket implementation
pub struct TungsteniteWs {
    url: String,
    write: Option<SplitSink<WsStream, Message>>,
    read: Option<SplitStream<WsStream>>,
    connected: bool,
    exchange_name: String,
    config: WsConfig,
}

impl TungsteniteWs {
    pub fn new(url: String, exchange_name: String) -> Self {
        Self {
            url,
            write: None,
            read: None,
            connected: false,
            exchange_name,
            config: WsConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| ExchangeError::transport(&self.url, "WebSocket connection timeout"))?
            .map_err(|e| ExchangeError::transport(&self.url, e))?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        Ok(())
    }

    #[instrument(skip(self, msg), fields(exchange = %self.exchange_name))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::transport(&self.url, "WebSocket not connected"));
        }

        let write = self
            .write
            .as_mut()
            .ok_or_else(|| ExchangeError::transport(&self.url, "write half not available"))?;

        if let Err(e) = write.send(msg).await {
            self.connected = false;
            return Err(ExchangeError::transport(&self.url, e));
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            if !self.connected {
                return Some(Err(ExchangeError::transport(
                    &self.url,
                    "WebSocket not connected",
                )));
            }

            let read = self.read.as_mut()?;
            match read.next().await {
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.send_raw(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    self.connected = false;
                    return None;
                }
                Some(Ok(message)) => return Some(Ok(message)),
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(ExchangeError::transport(&self.url, e)));
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_connect_is_transport_error() {
        let mut ws = TungsteniteWs::new("wss://example.invalid".to_string(), "test".to_string());
        assert!(!ws.is_connected());
        let err = ws.send_raw(Message::Text("{}".into())).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut ws = TungsteniteWs::new("wss://example.invalid".to_string(), "test".to_string());
        ws.close().await.unwrap();
        ws.close().await.unwrap();
        assert!(!ws.is_connected());
    }
}
