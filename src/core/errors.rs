use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    /// The HTTP or socket exchange could not be completed (network, timeout).
    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The body could not be parsed into the expected shape.
    #[error("Decode error on {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// The exchange answered with a non-success status indicator.
    #[error("Rejected by exchange on {endpoint}: {code} - {message}")]
    RemoteRejected {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Uninitialized: {0}")]
    Uninitialized(String),

    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    /// Server time could not be obtained or the signature could not be built.
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}

impl ExchangeError {
    pub fn transport(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Only transport failures are worth retrying without a protocol fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        Self::transport(endpoint, err)
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode("", err)
    }
}
