//! Local order book reconstruction

mod order_book;
mod price_level;

pub use order_book::{OrderBook, RemovedLevelCallback};
pub use price_level::{BookSide, Levels, PriceLevelStore};
