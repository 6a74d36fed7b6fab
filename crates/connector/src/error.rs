use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Subscription requests an adapter cannot serve. Raised before connecting.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigurationError {
    #[error("channel {channel} requires explicit symbols")]
    MissingSymbols { channel: String },
    #[error("{exchange} does not support channel {channel}")]
    UnsupportedChannel { exchange: String, channel: String },
    #[error("no filters provided")]
    NoFilters,
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),
    #[error("invalid aggregator config: {0}")]
    InvalidAggregator(String),
}

/// Failures that end one connection cycle. The client recovers from all of them.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("exchange error: {0}")]
    Exchange(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("no data received for {0:?}")]
    Stale(Duration),
    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manual snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl TransportError {
    /// Map a handshake failure, recognising HTTP 429 responses
    pub fn from_handshake(err: tungstenite::Error) -> Self {
        if let tungstenite::Error::Http(response) = &err {
            if response.status().as_u16() == 429 {
                return TransportError::RateLimited(format!(
                    "handshake rejected with {}",
                    response.status()
                ));
            }
        }
        TransportError::WebSocket(err)
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            TransportError::RateLimited(_) => true,
            TransportError::Snapshot(SnapshotError::RateLimited(_)) => true,
            other => other.to_string().contains("429"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
