pub mod codec;
pub mod conversions;
pub mod types;

pub mod builder;
pub mod connector;
pub mod rest;

// Re-export main components
pub use builder::{
    build_cancellable_connector, build_connector, build_signer, connector_with_rest, private_ws,
    public_ws,
};
pub use codec::BybitCodec;
pub use connector::{Account, BybitConnector, Funds, MarketData, Trading};
pub use rest::BybitRestClient;
pub use types::BybitApiResponse;
