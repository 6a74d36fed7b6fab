//! Normalized, exchange-agnostic market data messages.
//!
//! Every message serializes with a `type` tag (`trade`, `book_change`,
//! `book_snapshot`, `trade_bar`, `trade_bin`, `disconnect`) and camelCase fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use mdstream_metadata::BarKind;

/// Single price level. An amount of zero removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub amount: f64,
}

impl PriceLevel {
    pub fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub symbol: String,
    pub exchange: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub price: f64,
    pub amount: f64,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
}

/// Snapshot or incremental update of one instrument's book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookChange {
    pub symbol: String,
    pub exchange: String,
    pub is_snapshot: bool,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
}

/// Top-of-book levels at a point in time.
///
/// `bids` and `asks` always hold `depth` entries; `None` marks a missing level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub symbol: String,
    pub exchange: String,
    pub name: String,
    pub depth: usize,
    pub interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<f64>,
    pub bids: Vec<Option<PriceLevel>>,
    pub asks: Vec<Option<PriceLevel>>,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
}

/// OHLCV bar built from trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeBar {
    pub symbol: String,
    pub exchange: String,
    pub name: String,
    pub interval: f64,
    pub kind: BarKind,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub trades: u64,
    pub vwap: f64,
    pub open_timestamp: DateTime<Utc>,
    pub close_timestamp: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
}

/// Emitted whenever a connection cycle to an exchange ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnect {
    pub exchange: String,
    pub local_timestamp: DateTime<Utc>,
}

impl Disconnect {
    pub fn now(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            local_timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Trade,
    BookChange,
    BookSnapshot,
    TradeBar,
    TradeBin,
    Disconnect,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Trade => "trade",
            MessageType::BookChange => "book_change",
            MessageType::BookSnapshot => "book_snapshot",
            MessageType::TradeBar => "trade_bar",
            MessageType::TradeBin => "trade_bin",
            MessageType::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Trade(Trade),
    BookChange(BookChange),
    BookSnapshot(BookSnapshot),
    TradeBar(TradeBar),
    TradeBin(TradeBar),
    Disconnect(Disconnect),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Trade(_) => MessageType::Trade,
            Message::BookChange(_) => MessageType::BookChange,
            Message::BookSnapshot(_) => MessageType::BookSnapshot,
            Message::TradeBar(_) => MessageType::TradeBar,
            Message::TradeBin(_) => MessageType::TradeBin,
            Message::Disconnect(_) => MessageType::Disconnect,
        }
    }

    pub fn exchange(&self) -> &str {
        match self {
            Message::Trade(m) => &m.exchange,
            Message::BookChange(m) => &m.exchange,
            Message::BookSnapshot(m) => &m.exchange,
            Message::TradeBar(m) | Message::TradeBin(m) => &m.exchange,
            Message::Disconnect(m) => &m.exchange,
        }
    }

    /// Instrument symbol, None for disconnect sentinels
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Message::Trade(m) => Some(&m.symbol),
            Message::BookChange(m) => Some(&m.symbol),
            Message::BookSnapshot(m) => Some(&m.symbol),
            Message::TradeBar(m) | Message::TradeBin(m) => Some(&m.symbol),
            Message::Disconnect(_) => None,
        }
    }

    /// Name of the computation that produced this message, if derived
    pub fn name(&self) -> Option<&str> {
        match self {
            Message::BookSnapshot(m) => Some(&m.name),
            Message::TradeBar(m) | Message::TradeBin(m) => Some(&m.name),
            _ => None,
        }
    }

    pub fn local_timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::Trade(m) => m.local_timestamp,
            Message::BookChange(m) => m.local_timestamp,
            Message::BookSnapshot(m) => m.local_timestamp,
            Message::TradeBar(m) | Message::TradeBin(m) => m.local_timestamp,
            Message::Disconnect(m) => m.local_timestamp,
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, Message::Disconnect(_))
    }
}
