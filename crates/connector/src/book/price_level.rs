use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::message::PriceLevel;

/// Which side of the book a store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Totally ordered price key
#[derive(Debug, Clone, Copy)]
pub(crate) struct Price(pub(crate) f64);

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One side of an order book: price -> amount, iterated best price first.
///
/// No stored level ever has a zero amount.
#[derive(Debug, Clone)]
pub struct PriceLevelStore {
    side: BookSide,
    levels: BTreeMap<Price, f64>,
}

impl PriceLevelStore {
    pub fn new(side: BookSide) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> BookSide {
        self.side
    }

    /// Apply one level: zero deletes, existing overwrites, new non-zero inserts
    pub fn apply(&mut self, level: PriceLevel) {
        let key = Price(level.price);
        match self.levels.get_mut(&key) {
            Some(_) if level.amount == 0.0 => {
                self.levels.remove(&key);
            }
            Some(amount) => *amount = level.amount,
            None if level.amount != 0.0 => {
                self.levels.insert(key, level.amount);
            }
            None => {}
        }
    }

    pub fn get(&self, price: f64) -> Option<f64> {
        self.levels.get(&Price(price)).copied()
    }

    pub fn remove(&mut self, price: f64) -> Option<PriceLevel> {
        self.levels
            .remove(&Price(price))
            .map(|amount| PriceLevel::new(price, amount))
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn best(&self) -> Option<PriceLevel> {
        self.iter().next()
    }

    /// Fresh best-first iteration over the current levels
    pub fn iter(&self) -> Levels<'_> {
        Levels {
            side: self.side,
            inner: self.levels.iter(),
        }
    }
}

/// Best-first iterator over a [`PriceLevelStore`]
pub struct Levels<'a> {
    side: BookSide,
    inner: btree_map::Iter<'a, Price, f64>,
}

impl Iterator for Levels<'_> {
    type Item = PriceLevel;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.side {
            BookSide::Bid => self.inner.next_back(),
            BookSide::Ask => self.inner.next(),
        };
        entry.map(|(price, amount)| PriceLevel::new(price.0, *amount))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Levels<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(store: &PriceLevelStore) -> Vec<f64> {
        store.iter().map(|l| l.price).collect()
    }

    #[test]
    fn test_bids_iterate_descending() {
        let mut store = PriceLevelStore::new(BookSide::Bid);
        store.apply(PriceLevel::new(100.0, 1.0));
        store.apply(PriceLevel::new(102.0, 1.0));
        store.apply(PriceLevel::new(101.0, 1.0));
        assert_eq!(prices(&store), vec![102.0, 101.0, 100.0]);
        assert_eq!(store.best(), Some(PriceLevel::new(102.0, 1.0)));
    }

    #[test]
    fn test_asks_iterate_ascending() {
        let mut store = PriceLevelStore::new(BookSide::Ask);
        store.apply(PriceLevel::new(103.0, 1.0));
        store.apply(PriceLevel::new(101.5, 2.0));
        assert_eq!(prices(&store), vec![101.5, 103.0]);
        assert_eq!(store.iter().len(), 2);
    }

    #[test]
    fn test_apply_overwrite_and_delete() {
        let mut store = PriceLevelStore::new(BookSide::Ask);
        store.apply(PriceLevel::new(10.0, 1.0));
        store.apply(PriceLevel::new(10.0, 3.0));
        assert_eq!(store.get(10.0), Some(3.0));

        store.apply(PriceLevel::new(10.0, 0.0));
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_amount_for_unknown_level_is_ignored() {
        let mut store = PriceLevelStore::new(BookSide::Bid);
        store.apply(PriceLevel::new(10.0, 0.0));
        assert!(store.is_empty());
        assert_eq!(store.best(), None);
    }
}
