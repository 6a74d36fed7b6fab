//! Stateful derived-data computations over the normalized stream

mod book_snapshot;
mod dispatcher;
mod trade_bar;

use arrayvec::ArrayVec;
use chrono::{DateTime, Utc};
use mdstream_metadata::ComputeConfig;

use crate::error::ConfigurationError;
use crate::message::{Message, MessageType};

pub use book_snapshot::{grouped_ask_price, grouped_bid_price, BookSnapshotAggregator};
pub use dispatcher::{compute_stream, Dispatcher};
pub use trade_bar::TradeBarAggregator;

/// Output of a single `compute` call: a record closed before the update
/// and/or one closed by it.
pub type Computed = ArrayVec<Message, 2>;

/// Rolling computation over one (exchange, symbol) stream.
pub trait Aggregator: Send {
    /// Message types this aggregator consumes
    fn source_types(&self) -> &'static [MessageType];

    fn compute(&mut self, message: &Message) -> Computed;
}

/// Builds fresh aggregator instances for each new dispatcher key
pub trait AggregatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Aggregator>;
}

/// Factory for a declared computation; only built from a validated config
pub(crate) struct ConfigFactory(ComputeConfig);

impl ConfigFactory {
    pub(crate) fn new(config: &ComputeConfig) -> Result<Self, ConfigurationError> {
        config
            .validate()
            .map_err(|e| ConfigurationError::InvalidAggregator(e.to_string()))?;
        Ok(Self(config.clone()))
    }
}

impl AggregatorFactory for ConfigFactory {
    fn create(&self) -> Box<dyn Aggregator> {
        match &self.0 {
            ComputeConfig::BookSnapshot(cfg) => Box::new(BookSnapshotAggregator::from_valid(cfg)),
            ComputeConfig::TradeBar(cfg) => Box::new(TradeBarAggregator::new_bar(cfg)),
            ComputeConfig::TradeBin(cfg) => Box::new(TradeBarAggregator::new_bin(cfg)),
        }
    }
}

pub(crate) fn time_bucket(timestamp: DateTime<Utc>, interval_ms: i64) -> i64 {
    timestamp.timestamp_millis().div_euclid(interval_ms)
}

/// Largest exact unit: `500ms`, `5s`, `1m`, `4h`
pub(crate) fn format_interval_ms(interval_ms: u64) -> String {
    const SECOND: u64 = 1_000;
    const MINUTE: u64 = 60 * SECOND;
    const HOUR: u64 = 60 * MINUTE;

    match interval_ms {
        0 => "0ms".to_string(),
        ms if ms % HOUR == 0 => format!("{}h", ms / HOUR),
        ms if ms % MINUTE == 0 => format!("{}m", ms / MINUTE),
        ms if ms % SECOND == 0 => format!("{}s", ms / SECOND),
        ms => format!("{}ms", ms),
    }
}
