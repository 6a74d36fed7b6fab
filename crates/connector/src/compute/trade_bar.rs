use chrono::{DateTime, Utc};
use mdstream_metadata::{BarKind, TradeBarConfig};

use super::{format_interval_ms, time_bucket, Aggregator, Computed};
use crate::error::ConfigurationError;
use crate::message::{Message, MessageType, Trade, TradeBar, TradeSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Bar,
    Bin,
}

impl Flavor {
    fn prefix(self) -> &'static str {
        match self {
            Flavor::Bar => "trade_bar",
            Flavor::Bin => "trade_bin",
        }
    }
}

/// In-progress bar; `trades == 0` means nothing has been accumulated yet
#[derive(Debug, Clone)]
struct BarState {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    buy_volume: f64,
    sell_volume: f64,
    trades: u64,
    vwap: f64,
    open_timestamp: DateTime<Utc>,
    close_timestamp: DateTime<Utc>,
    timestamp: DateTime<Utc>,
}

impl BarState {
    fn empty() -> Self {
        let before_epoch = DateTime::<Utc>::default() - chrono::Duration::milliseconds(1);
        Self {
            open: 0.0,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            close: 0.0,
            volume: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            trades: 0,
            vwap: 0.0,
            open_timestamp: before_epoch,
            close_timestamp: before_epoch,
            timestamp: before_epoch,
        }
    }

    fn add(&mut self, trade: &Trade) {
        if self.trades == 0 {
            self.open = trade.price;
            self.open_timestamp = trade.timestamp;
        }
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.close_timestamp = trade.timestamp;

        match trade.side {
            TradeSide::Buy => self.buy_volume += trade.amount,
            TradeSide::Sell => self.sell_volume += trade.amount,
            TradeSide::Unknown => {}
        }
        self.trades += 1;

        // vwap must be updated before volume
        let total = self.volume + trade.amount;
        if total != 0.0 {
            self.vwap = (self.vwap * self.volume + trade.price * trade.amount) / total;
        }
        self.volume = total;
        self.timestamp = trade.timestamp;
    }
}

fn validated(config: &TradeBarConfig) -> Result<&TradeBarConfig, ConfigurationError> {
    config
        .validate()
        .map_err(|e| ConfigurationError::InvalidAggregator(e.to_string()))?;
    Ok(config)
}

/// OHLCV bars closed by time bucket, traded volume or trade count.
///
/// Trade bins accumulate exactly like bars and differ only by record type and name.
pub struct TradeBarAggregator {
    flavor: Flavor,
    kind: BarKind,
    interval: f64,
    name: String,
    bar: BarState,
}

impl TradeBarAggregator {
    pub fn bar(config: &TradeBarConfig) -> Result<Self, ConfigurationError> {
        validated(config).map(|config| Self::new(config, Flavor::Bar))
    }

    pub fn bin(config: &TradeBarConfig) -> Result<Self, ConfigurationError> {
        validated(config).map(|config| Self::new(config, Flavor::Bin))
    }

    /// `config` must already be validated
    pub(crate) fn new_bar(config: &TradeBarConfig) -> Self {
        Self::new(config, Flavor::Bar)
    }

    /// `config` must already be validated
    pub(crate) fn new_bin(config: &TradeBarConfig) -> Self {
        Self::new(config, Flavor::Bin)
    }

    fn new(config: &TradeBarConfig, flavor: Flavor) -> Self {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| default_name(flavor, config.kind, config.interval));
        Self {
            flavor,
            kind: config.kind,
            interval: config.interval,
            name,
            bar: BarState::empty(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn bar_closed(&mut self, timestamp: DateTime<Utc>) -> bool {
        if self.bar.trades == 0 {
            return false;
        }

        match self.kind {
            BarKind::Time => {
                let interval = self.interval as i64;
                let open_bucket = time_bucket(self.bar.open_timestamp, interval);
                if time_bucket(timestamp, interval) > open_bucket {
                    // stamp with the end of the bar's bucket
                    if let Some(end) = DateTime::from_timestamp_millis((open_bucket + 1) * interval)
                    {
                        self.bar.timestamp = end;
                    }
                    return true;
                }
                false
            }
            BarKind::Volume => self.bar.volume >= self.interval,
            BarKind::Tick => self.bar.trades as f64 >= self.interval,
        }
    }

    fn emit(&mut self, trade: &Trade) -> Message {
        let bar = std::mem::replace(&mut self.bar, BarState::empty());
        let record = TradeBar {
            symbol: trade.symbol.clone(),
            exchange: trade.exchange.clone(),
            name: self.name.clone(),
            interval: self.interval,
            kind: self.kind,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            buy_volume: bar.buy_volume,
            sell_volume: bar.sell_volume,
            trades: bar.trades,
            vwap: bar.vwap,
            open_timestamp: bar.open_timestamp,
            close_timestamp: bar.close_timestamp,
            timestamp: bar.timestamp,
            local_timestamp: trade.local_timestamp,
        };
        match self.flavor {
            Flavor::Bar => Message::TradeBar(record),
            Flavor::Bin => Message::TradeBin(record),
        }
    }
}

impl Aggregator for TradeBarAggregator {
    fn source_types(&self) -> &'static [MessageType] {
        &[MessageType::Trade]
    }

    fn compute(&mut self, message: &Message) -> Computed {
        let mut out = Computed::new();
        let Message::Trade(trade) = message else {
            return out;
        };

        if self.bar_closed(trade.timestamp) {
            out.push(self.emit(trade));
        }

        self.bar.add(trade);

        // volume and tick bars can be closed by the trade just added
        if self.bar_closed(trade.timestamp) {
            out.push(self.emit(trade));
        }

        out
    }
}

fn default_name(flavor: Flavor, kind: BarKind, interval: f64) -> String {
    let suffix = match kind {
        BarKind::Time => format_interval_ms(interval as u64),
        BarKind::Volume => format!("{}vol", interval),
        BarKind::Tick => format!("{}ticks", interval),
    };
    format!("{}_{}", flavor.prefix(), suffix)
}
