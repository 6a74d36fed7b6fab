//! Kraken exchange adapter
//!
//! Public spot market data (book, trade) via the v2 WebSocket API.

pub mod adapter;
pub mod mapper;
pub mod messages;

pub use adapter::{KrakenAdapter, KRAKEN_WS_URL};
pub use mapper::KrakenMapper;
pub use messages::KrakenWsMessage;
