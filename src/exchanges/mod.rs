pub mod bybit;
pub mod ftx;
pub mod serde_decimal;
