use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::compute::ComputeConfig;
use crate::error::MetadataError;

/// Default delay between subscribing and starting manual snapshot fetches
pub const DEFAULT_SNAPSHOT_SETTLE_DELAY_MS: u64 = 1000;

/// Subscription request unit: one channel, optionally scoped to symbols.
///
/// Missing symbols are only valid for adapters supporting channel-wide subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
}

impl Filter {
    pub fn new(channel: impl Into<String>, symbols: Option<Vec<String>>) -> Self {
        Self {
            channel: channel.into(),
            symbols,
        }
    }

    /// Symbols of this filter, empty when the filter is channel-wide
    pub fn symbols(&self) -> &[String] {
        self.symbols.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    /// Exchange identifier used to look up the adapter (e.g. "kraken")
    pub exchange: String,
    /// WebSocket URL override (None = adapter default)
    #[serde(default)]
    pub endpoint: Option<String>,
    pub filters: Vec<Filter>,
    /// Force a reconnect when no frame arrives within this window
    #[serde(default)]
    pub staleness_timeout_ms: Option<u64>,
    #[serde(default)]
    pub snapshot_settle_delay_ms: Option<u64>,
    #[serde(default)]
    pub compute: Vec<ComputeConfig>,
}

impl Feed {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let feed: Feed =
            serde_yaml::from_str(&content).map_err(|source| MetadataError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        feed.validate()?;
        Ok(feed)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.exchange.trim().is_empty() {
            return Err(MetadataError::Validation("exchange must not be empty".into()));
        }
        if self.filters.is_empty() {
            return Err(MetadataError::Validation(format!(
                "feed {} declares no filters",
                self.exchange
            )));
        }
        if self.staleness_timeout_ms == Some(0) {
            return Err(MetadataError::Validation(
                "staleness_timeout_ms must be positive".into(),
            ));
        }
        for (index, compute) in self.compute.iter().enumerate() {
            compute.validate().map_err(|e| MetadataError::Compute {
                index,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn staleness_timeout(&self) -> Option<Duration> {
        self.staleness_timeout_ms.map(Duration::from_millis)
    }

    pub fn snapshot_settle_delay(&self) -> Duration {
        Duration::from_millis(
            self.snapshot_settle_delay_ms
                .unwrap_or(DEFAULT_SNAPSHOT_SETTLE_DELAY_MS),
        )
    }
}
