//! mdstream-metadata: feed and computation configuration types

pub mod compute;
pub mod error;
pub mod feed;

pub use compute::{BarKind, BookSnapshotConfig, ComputeConfig, TradeBarConfig};
pub use error::MetadataError;
pub use feed::{Feed, Filter, DEFAULT_SNAPSHOT_SETTLE_DELAY_MS};
