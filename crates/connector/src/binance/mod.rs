//! Binance exchange adapter
//!
//! Spot trades and depth diffs over the combined stream, with REST depth
//! snapshots fetched out of band.

pub mod adapter;
pub mod mapper;
pub mod messages;
pub mod snapshots;

pub use adapter::{BinanceAdapter, BINANCE_WS_URL};
pub use mapper::BinanceMapper;
pub use snapshots::{BinanceSnapshotProvider, SnapshotLimits, BINANCE_REST_URL};
