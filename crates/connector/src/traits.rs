use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mdstream_metadata::Filter;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigurationError, SnapshotError, TransportError, WriterError};
use crate::message::Message;
use crate::stream::{CustomPing, SnapshotSink, Subscription};

/// Per-exchange protocol capabilities used by the streaming client
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange identifier stamped on every message
    fn exchange(&self) -> &str;

    /// Resolve the websocket URL. May perform a handshake.
    async fn endpoint(&self, filters: &[Filter]) -> Result<String, TransportError>;

    /// Build the subscription. Errors here are fatal and never retried.
    fn subscribe_messages(&self, filters: &[Filter]) -> Result<Subscription, ConfigurationError>;

    /// Exchange-level error payload; ends the connection cycle
    fn is_error(&self, message: &Value) -> bool;

    /// Counts towards liveness but is not forwarded
    fn is_heartbeat(&self, _message: &Value) -> bool {
        false
    }

    fn custom_ping(&self) -> Option<CustomPing> {
        None
    }

    fn decompress(&self, frame: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        Ok(frame)
    }

    /// Out-of-band snapshot fetcher for exchanges whose streams carry only diffs
    fn snapshot_provider(&self, _filters: &[Filter]) -> Option<Arc<dyn SnapshotProvider>> {
        None
    }

    /// Optional reply frame for an incoming message
    fn on_message(&self, _message: &Value) -> Option<String> {
        None
    }
}

/// Fetches manual snapshots and pushes them into the live stream
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn provide(
        &self,
        filters: &[Filter],
        sink: SnapshotSink,
        cancel: CancellationToken,
    ) -> Result<(), SnapshotError>;
}

/// Turns raw exchange payloads into normalized messages
pub trait Mapper: Send {
    fn map(&mut self, message: &Value, local_timestamp: DateTime<Utc>) -> Vec<Message>;

    /// Drop per-connection state; called on every disconnect
    fn reset(&mut self) {}
}

/// Writer trait for output destinations
#[async_trait]
pub trait Writer: Send {
    /// Write a message to the destination
    async fn write(&mut self, msg: &Message) -> Result<(), WriterError>;

    /// Close and flush the writer
    async fn close(&mut self) -> Result<(), WriterError>;
}
