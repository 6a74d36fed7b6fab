//! mdstream-connector: normalized market data streaming
//!
//! This crate connects to exchange websocket feeds, keeps connections alive
//! across failures, maps raw payloads into normalized messages and derives
//! book snapshots and trade bars from them.

pub mod binance;
pub mod book;
pub mod compute;
pub mod error;
pub mod exchange;
pub mod kraken;
pub mod message;
pub mod metrics;
pub mod runner;
pub mod server;
pub mod stream;
pub mod traits;
pub mod writer;

pub use book::OrderBook;
pub use compute::{compute_stream, Dispatcher};
pub use error::{ConfigurationError, SnapshotError, TransportError, WriterError};
pub use exchange::{exchange_for, Exchange, SUPPORTED_EXCHANGES};
pub use message::Message;
pub use runner::Runner;
pub use server::{create_router, run_server, ServerState};
pub use stream::{StreamEvent, StreamOptions, StreamStatus, StreamingClient};
pub use traits::{ExchangeAdapter, Mapper, SnapshotProvider, Writer};
pub use writer::JsonLinesWriter;
