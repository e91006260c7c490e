pub mod codec;
pub mod types;

pub use codec::FtxCodec;

/// Public and private traffic share one endpoint; private channels need a login first.
pub const STREAM_URL: &str = "wss://ftx.com/ws/";
