use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unifex::core::traits::MarketDataSource;
use unifex::exchanges::bybit::{self, BybitCodec};
use unifex::{ExchangeConfig, Session, SessionRegistry, StreamPayload, Symbol, Topic};

const SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // BYBIT_API_KEY / BYBIT_SECRET_KEY enable the signed endpoints; market data works without
    let config = ExchangeConfig::from_env_file("BYBIT").unwrap_or_else(|e| {
        warn!("no credentials loaded ({}), running read-only", e);
        ExchangeConfig::read_only()
    });

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let connector = bybit::build_cancellable_connector(config.clone(), cancel_rx.clone())
        .context("building Bybit REST connector")?;

    let server_time = connector.get_server_time().await?;
    info!(%server_time, "Bybit server time");
    if let Ok(filter) = connector.get_price_filter(&Symbol::new("BTC", "USDT")?).await {
        info!(tick_size = %filter.tick_size, "BTC/USDT price filter");
    }

    let registry = SessionRegistry::new();
    let mut builder = Session::builder("bybit", &registry)
        .rest(Arc::new(connector))
        .public_stream(bybit::public_ws(&config), BybitCodec)
        .cancellation(cancel_rx);
    if let Some(signer) = bybit::build_signer(&config) {
        builder = builder.signer(signer);
    }
    let mut session = builder.build()?;

    let mut events = session.create_output_conduit(1024)?;
    session.connect().await?;

    let symbols: Vec<String> = SYMBOLS.iter().map(ToString::to_string).collect();
    session
        .subscribe_public(&[Topic::Orderbook, Topic::Trades], &symbols)
        .await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel_tx.send_replace(true);
        }
    });

    while let Some(event) = events.recv().await {
        let symbol = event.symbol.as_deref().unwrap_or("-");
        match event.payload {
            StreamPayload::OrderbookDelta(book) => println!(
                "[book] {} {:?} bids={} asks={}",
                symbol,
                book.action,
                book.bids.len(),
                book.asks.len()
            ),
            StreamPayload::Trades(trades) => {
                for trade in trades {
                    println!(
                        "[trade] {} {:?} {} @ {}",
                        symbol, trade.side, trade.size, trade.price
                    );
                }
            }
            StreamPayload::Ticker(ticker) => {
                println!("[ticker] {} bid={:?} ask={:?}", symbol, ticker.bid, ticker.ask);
            }
            StreamPayload::Error(message) => warn!("stream error: {}", message),
            other => println!("[other] {} {:?}", symbol, other),
        }
    }

    session.shutdown().await;
    Ok(())
}
