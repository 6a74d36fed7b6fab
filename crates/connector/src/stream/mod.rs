//! Resilient, exchange-agnostic streaming transport

mod backoff;
mod client;
mod status;
pub mod compression;

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

pub use backoff::Backoff;
pub use client::{StreamEvent, StreamOptions, StreamingClient};
pub use status::StreamStatus;

/// How an adapter subscribes to its filters
#[derive(Debug, Clone, PartialEq)]
pub enum Subscription {
    /// Frames sent right after connecting
    Messages(Vec<String>),
    /// Appended to the endpoint URL; nothing is sent
    UrlSuffix(String),
}

/// Application-level keepalive frame sent on a fixed interval
#[derive(Debug, Clone, PartialEq)]
pub struct CustomPing {
    pub interval: Duration,
    pub payload: String,
}

/// Hands manually fetched snapshots back to the streaming client.
///
/// Pushed messages are buffered and forwarded right after the next live message.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    tx: mpsc::UnboundedSender<Value>,
}

impl SnapshotSink {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }

    /// Returns false once the connection that owns the buffer is gone
    pub fn push(&self, message: Value) -> bool {
        self.tx.send(message).is_ok()
    }
}
