pub mod core;
pub mod exchanges;

#[cfg(any(test, feature = "testkit"))]
pub mod testing;

pub use core::{
    config::ExchangeConfig,
    errors::ExchangeError,
    session::{Session, SessionRegistry, SessionState},
    stream::{EventReceiver, StreamConfig},
    traits::ExchangeConnector,
    types::*,
};
pub use exchanges::bybit::BybitConnector;
