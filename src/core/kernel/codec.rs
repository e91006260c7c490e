use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::Signer;
use crate::core::types::{StreamEvent, SubscriptionKey};
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for handling exchange-specific WebSocket message encoding/decoding
///
/// The codec is the only place that knows an exchange's frame layout. It turns
/// subscription keys into control frames and inbound frames into canonical events.
pub trait WsCodec: Send + Sync + 'static {
    fn encode_subscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError>;

    fn encode_unsubscription(&self, key: &SubscriptionKey) -> Result<Message, ExchangeError>;

    /// Signed login frame for private connections. `time_ms` is the signing timestamp.
    fn encode_login(&self, signer: &dyn Signer, time_ms: u64) -> Result<Message, ExchangeError>;

    /// Application-level keep-alive frame, if the exchange wants one.
    fn encode_ping(&self) -> Option<Message> {
        None
    }

    /// Decode a data frame.
    ///
    /// - `Ok(events)` - frame classified; batched pushes yield one event per item, in frame order
    /// - `Ok(vec![])` - control acknowledgement (subscribed, pong, ...) with nothing to publish
    /// - `Err(error)` - frame could not be classified
    fn decode_message(&self, message: Message) -> Result<Vec<StreamEvent>, ExchangeError>;
}
