use tracing::debug;

use super::price_level::{BookSide, Levels, PriceLevelStore};
use crate::message::{BookChange, PriceLevel};

/// Invoked for every level dropped by crossed-level removal
pub type RemovedLevelCallback = Box<dyn FnMut(BookSide, PriceLevel) + Send>;

/// Two-sided book rebuilt from snapshot + incremental changes.
///
/// Incremental changes are dropped until the first snapshot has been applied.
pub struct OrderBook {
    bids: PriceLevelStore,
    asks: PriceLevelStore,
    received_initial_snapshot: bool,
    remove_crossed_levels: bool,
    on_crossed_level_removed: Option<RemovedLevelCallback>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: PriceLevelStore::new(BookSide::Bid),
            asks: PriceLevelStore::new(BookSide::Ask),
            received_initial_snapshot: false,
            remove_crossed_levels: false,
            on_crossed_level_removed: None,
        }
    }

    pub fn with_crossed_level_removal(mut self, callback: Option<RemovedLevelCallback>) -> Self {
        self.remove_crossed_levels = true;
        self.on_crossed_level_removed = callback;
        self
    }

    pub fn update(&mut self, change: &BookChange) {
        if change.is_snapshot {
            self.bids.clear();
            self.asks.clear();
            self.received_initial_snapshot = true;
        }

        if !self.received_initial_snapshot {
            return;
        }

        for level in &change.bids {
            self.bids.apply(*level);
        }
        for level in &change.asks {
            self.asks.apply(*level);
        }

        if self.remove_crossed_levels {
            self.remove_crossed(change);
        }
    }

    /// Drop levels on the stale side until the book is no longer crossed
    fn remove_crossed(&mut self, change: &BookChange) {
        loop {
            let (bid, ask) = match (self.bids.best(), self.asks.best()) {
                (Some(bid), Some(ask)) if bid.price >= ask.price => (bid, ask),
                _ => return,
            };

            let bid_touched = change.bids.iter().any(|l| l.price == bid.price);
            let ask_touched = change.asks.iter().any(|l| l.price == ask.price);
            let stale = if bid_touched && !ask_touched {
                BookSide::Ask
            } else {
                BookSide::Bid
            };

            let removed = match stale {
                BookSide::Bid => self.bids.remove(bid.price),
                BookSide::Ask => self.asks.remove(ask.price),
            };

            if let Some(level) = removed {
                debug!(
                    symbol = %change.symbol,
                    side = ?stale,
                    price = level.price,
                    amount = level.amount,
                    "Removed crossed level"
                );
                if let Some(callback) = self.on_crossed_level_removed.as_mut() {
                    callback(stale, level);
                }
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.received_initial_snapshot
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    pub fn bids(&self) -> Levels<'_> {
        self.bids.iter()
    }

    pub fn asks(&self) -> Levels<'_> {
        self.asks.iter()
    }
}
