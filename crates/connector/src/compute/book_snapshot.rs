use chrono::{DateTime, Utc};
use mdstream_metadata::BookSnapshotConfig;

use super::{format_interval_ms, time_bucket, Aggregator, Computed};
use crate::book::{Levels, OrderBook};
use crate::error::ConfigurationError;
use crate::message::{BookChange, BookSnapshot, Message, MessageType, PriceLevel};

const MAX_DECIMAL_PLACES: u32 = 15;

#[derive(Debug, Clone, Copy)]
struct Grouping {
    size: f64,
    decimal_places: u32,
}

/// Emits top-`depth` book snapshots, optionally grouped into price buckets,
/// either on every change (`interval == 0`) or once per time bucket.
pub struct BookSnapshotAggregator {
    depth: usize,
    interval: u64,
    grouping: Option<Grouping>,
    name: String,
    book: OrderBook,
    bids: Vec<Option<PriceLevel>>,
    asks: Vec<Option<PriceLevel>>,
    has_changed: bool,
    initialized: bool,
    last_update_timestamp: DateTime<Utc>,
}

impl BookSnapshotAggregator {
    pub fn new(config: &BookSnapshotConfig) -> Result<Self, ConfigurationError> {
        config
            .validate()
            .map_err(|e| ConfigurationError::InvalidAggregator(e.to_string()))?;
        Ok(Self::from_valid(config))
    }

    /// `config` must already be validated
    pub(crate) fn from_valid(config: &BookSnapshotConfig) -> Self {
        let book = if config.remove_crossed_levels {
            OrderBook::new().with_crossed_level_removal(None)
        } else {
            OrderBook::new()
        };

        Self {
            depth: config.depth,
            interval: config.interval,
            grouping: config.grouping.map(|size| Grouping {
                size,
                decimal_places: decimal_places(size),
            }),
            name: config.name.clone().unwrap_or_else(|| default_name(config)),
            book,
            bids: vec![None; config.depth],
            asks: vec![None; config.depth],
            has_changed: false,
            initialized: false,
            last_update_timestamp: DateTime::<Utc>::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn has_new_snapshot(&mut self, timestamp: DateTime<Utc>) -> bool {
        if !self.has_changed {
            return false;
        }
        if self.interval == 0 || !self.initialized {
            return true;
        }

        let interval = self.interval as i64;
        let current_bucket = time_bucket(timestamp, interval);
        let snapshot_bucket = time_bucket(self.last_update_timestamp, interval);
        if current_bucket > snapshot_bucket {
            // stamp with the end of the bucket the snapshot belongs to
            if let Some(end) = DateTime::from_timestamp_millis((snapshot_bucket + 1) * interval) {
                self.last_update_timestamp = end;
            }
            return true;
        }
        false
    }

    fn update(&mut self, change: &BookChange) {
        self.book.update(change);

        let changed = match self.grouping {
            Some(grouping) => {
                let bids = track_grouped(self.book.bids(), &mut self.bids, |p| {
                    grouped_bid_price_with(p, grouping)
                });
                let asks = track_grouped(self.book.asks(), &mut self.asks, |p| {
                    grouped_ask_price_with(p, grouping)
                });
                bids | asks
            }
            None => {
                let bids = track_ungrouped(self.book.bids(), &mut self.bids);
                let asks = track_ungrouped(self.book.asks(), &mut self.asks);
                bids | asks
            }
        };

        if changed {
            self.has_changed = true;
        }
        self.last_update_timestamp = change.timestamp;
    }

    fn snapshot(&mut self, change: &BookChange) -> Message {
        self.has_changed = false;
        Message::BookSnapshot(BookSnapshot {
            symbol: change.symbol.clone(),
            exchange: change.exchange.clone(),
            name: self.name.clone(),
            depth: self.depth,
            interval: self.interval,
            grouping: self.grouping.map(|g| g.size),
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            timestamp: self.last_update_timestamp,
            local_timestamp: change.local_timestamp,
        })
    }
}

impl Aggregator for BookSnapshotAggregator {
    fn source_types(&self) -> &'static [MessageType] {
        &[MessageType::BookChange]
    }

    fn compute(&mut self, message: &Message) -> Computed {
        let mut out = Computed::new();
        let Message::BookChange(change) = message else {
            return out;
        };

        if self.has_new_snapshot(change.timestamp) {
            out.push(self.snapshot(change));
        }

        self.update(change);

        // interval 0 and the very first snapshot are emitted right after the update
        if self.has_new_snapshot(change.timestamp) {
            out.push(self.snapshot(change));
            self.initialized = true;
        }

        out
    }
}

fn default_name(config: &BookSnapshotConfig) -> String {
    let mut name = format!(
        "book_snapshot_{}_{}",
        config.depth,
        format_interval_ms(config.interval)
    );
    if let Some(grouping) = config.grouping {
        name.push_str(&format!("_grouped{}", grouping));
    }
    if config.remove_crossed_levels {
        name.push_str("_rcl");
    }
    name
}

fn set_level(slot: &mut Option<PriceLevel>, level: Option<PriceLevel>) -> bool {
    if *slot == level {
        return false;
    }
    *slot = level;
    true
}

fn track_ungrouped(mut levels: Levels<'_>, tracked: &mut [Option<PriceLevel>]) -> bool {
    let mut changed = false;
    for slot in tracked.iter_mut() {
        changed |= set_level(slot, levels.next());
    }
    changed
}

fn track_grouped(
    levels: Levels<'_>,
    tracked: &mut [Option<PriceLevel>],
    group_price: impl Fn(f64) -> f64,
) -> bool {
    let depth = tracked.len();
    let mut changed = false;
    let mut current_price: Option<f64> = None;
    let mut amount = 0.0;
    let mut filled = 0;

    for level in levels {
        let price = group_price(level.price);
        let current = *current_price.get_or_insert(price);

        if current != price {
            changed |= set_level(&mut tracked[filled], Some(PriceLevel::new(current, amount)));
            filled += 1;
            if filled == depth {
                break;
            }
            current_price = Some(price);
            amount = 0.0;
        }
        amount += level.amount;
    }

    if filled < depth && amount > 0.0 {
        if let Some(price) = current_price {
            changed |= set_level(&mut tracked[filled], Some(PriceLevel::new(price, amount)));
            filled += 1;
        }
    }

    for slot in tracked.iter_mut().skip(filled) {
        changed |= set_level(slot, None);
    }

    changed
}

/// Digits after the decimal point of the shortest representation of `value`
fn decimal_places(value: f64) -> u32 {
    let text = value.to_string();
    let places = text.split_once('.').map_or(0, |(_, frac)| frac.len() as u32);
    places.min(MAX_DECIMAL_PLACES)
}

/// Price and grouping as integers at a shared decimal scale
fn scaled(price: f64, grouping: Grouping) -> (i128, i128, f64) {
    let places = decimal_places(price).max(grouping.decimal_places);
    let scale = 10f64.powi(places as i32);
    (
        (price * scale).round() as i128,
        (grouping.size * scale).round() as i128,
        scale,
    )
}

fn grouped_bid_price_with(price: f64, grouping: Grouping) -> f64 {
    let (p, g, scale) = scaled(price, grouping);
    if g <= 0 {
        return price;
    }
    let floor = p.div_euclid(g) * g;
    let grouped = floor as f64 / scale;
    if grouped > price {
        (floor - g) as f64 / scale
    } else {
        grouped
    }
}

fn grouped_ask_price_with(price: f64, grouping: Grouping) -> f64 {
    let (p, g, scale) = scaled(price, grouping);
    if g <= 0 {
        return price;
    }
    let mut ceil = p.div_euclid(g) * g;
    if ceil < p {
        ceil += g;
    }
    let grouped = ceil as f64 / scale;
    if grouped < price {
        (ceil + g) as f64 / scale
    } else {
        grouped
    }
}

/// Bid price floored to a multiple of `grouping`
pub fn grouped_bid_price(price: f64, grouping: f64) -> f64 {
    grouped_bid_price_with(
        price,
        Grouping {
            size: grouping,
            decimal_places: decimal_places(grouping),
        },
    )
}

/// Ask price ceiled to a multiple of `grouping`
pub fn grouped_ask_price(price: f64, grouping: f64) -> f64 {
    grouped_ask_price_with(
        price,
        Grouping {
            size: grouping,
            decimal_places: decimal_places(grouping),
        },
    )
}
