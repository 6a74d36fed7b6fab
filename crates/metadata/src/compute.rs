//! Declarative configuration of the derived-data computations

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// What closes a trade bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    /// Interval is a bucket width in milliseconds
    Time,
    /// Interval is an accumulated traded amount
    Volume,
    /// Interval is a trade count
    Tick,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookSnapshotConfig {
    pub depth: usize,
    /// Milliseconds, 0 = emit on every book-affecting update
    pub interval: u64,
    #[serde(default)]
    pub grouping: Option<f64>,
    #[serde(default)]
    pub remove_crossed_levels: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeBarConfig {
    pub kind: BarKind,
    pub interval: f64,
    #[serde(default)]
    pub name: Option<String>,
}

/// One entry of a feed's `compute` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputeConfig {
    BookSnapshot(BookSnapshotConfig),
    TradeBar(TradeBarConfig),
    TradeBin(TradeBarConfig),
}

impl BookSnapshotConfig {
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.depth == 0 {
            return Err(MetadataError::Validation(
                "book_snapshot depth must be positive".into(),
            ));
        }
        if let Some(grouping) = self.grouping {
            if !grouping.is_finite() || grouping <= 0.0 {
                return Err(MetadataError::Validation(format!(
                    "book_snapshot grouping must be positive, got {}",
                    grouping
                )));
            }
        }
        Ok(())
    }
}

impl TradeBarConfig {
    pub fn validate(&self) -> Result<(), MetadataError> {
        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err(MetadataError::Validation(format!(
                "trade bar interval must be positive, got {}",
                self.interval
            )));
        }
        if self.kind != BarKind::Volume && self.interval.fract() != 0.0 {
            return Err(MetadataError::Validation(format!(
                "{:?} bar interval must be a whole number, got {}",
                self.kind, self.interval
            )));
        }
        Ok(())
    }
}

impl ComputeConfig {
    pub fn validate(&self) -> Result<(), MetadataError> {
        match self {
            ComputeConfig::BookSnapshot(cfg) => cfg.validate(),
            ComputeConfig::TradeBar(cfg) | ComputeConfig::TradeBin(cfg) => cfg.validate(),
        }
    }
}
