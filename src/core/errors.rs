use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid subscription request: {0}")]
    InvalidSubscription(String),

    #[error("Venue rejected request: {message} ({reason})")]
    ProtocolReject { message: String, reason: String },

    #[error("Sequence gap on {instrument}: expected {expected}, received {received}")]
    SequenceGap {
        instrument: String,
        expected: u64,
        received: u64,
    },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Unregistered endpoint class: {0}")]
    UnregisteredEndpoint(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl ExchangeError {
    /// Whether the error came from the transport rather than from venue logic
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::NetworkError(_) | Self::ConnectionTimeout(_)
        )
    }
}
