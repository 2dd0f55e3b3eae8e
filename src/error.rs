//! Error types for the Bitfinex connector

use thiserror::Error;

/// Connector errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("WebSocket connection error: {0}")]
    WebSocket(String),

    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    #[error("Socket session has not been started")]
    SessionNotStarted,

    #[error("No Tokio runtime to run the socket session: {0}")]
    NoRuntime(String),

    #[error("HTTP request to {url} failed with status {status}")]
    Http { status: u16, url: String },

    #[error("REST API error: {0}")]
    RestApi(String),

    #[error("Exchange error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Unexpected ticker data format: {0} fields")]
    UnexpectedTickerFormat(usize),

    #[error("No timeframe for a period of {0} seconds")]
    UnknownTimeframe(u32),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectorError::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ConnectorError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) => ConnectorError::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => ConnectorError::RestApi(err.to_string()),
        }
    }
}

impl ConnectorError {
    /// Whether the error came from decoding a payload rather than moving it
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            ConnectorError::Parse(_)
                | ConnectorError::InvalidPayload(_)
                | ConnectorError::InvalidTimestamp(_)
                | ConnectorError::UnexpectedTickerFormat(_)
                | ConnectorError::UnknownTimeframe(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
