/// Transport kernel shared by every exchange adapter.
///
/// The kernel holds no exchange-specific logic:
///
/// - `RestClient` / `ReqwestRest`: byte-exact HTTP execution, cancellable through a
///   shutdown signal
/// - `WsSession` / `TungsteniteWs`: WebSocket transport with transport-level ping handling
/// - `Signer` / `HmacSigner`: canonicalization and HMAC-SHA256 signatures
/// - `WsCodec`: per-exchange frame encoding and classification
///
/// # Example
/// ```rust,no_run
/// use unifex::core::kernel::*;
/// use std::collections::BTreeMap;
///
/// let mut params = BTreeMap::new();
/// params.insert("symbol".to_string(), "BTCUSDT".to_string());
/// params.insert("qty".to_string(), "1.000".to_string());
/// let canonical = canonicalize(&params);
/// assert_eq!(canonical, "qty=1.000&symbol=BTCUSDT");
/// let _signature = sign_hex("s3cr3t", &canonical);
/// ```
pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::WsCodec;
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, RestRequest};
pub use signer::{
    canonicalize, sign_hex, signed_timestamp, HmacSigner, SignaturePlacement, SignedRequest,
    Signer,
};
pub use ws::{TungsteniteWs, WsConfig, WsSession};

use tokio::sync::watch;

/// Resolve once the shutdown flag is raised or its sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *shutdown.borrow_and_update();
        if stopped || shutdown.changed().await.is_err() {
            return;
        }
    }
}
