use std::sync::Arc;

use async_trait::async_trait;
use mdstream_metadata::Filter;
use serde_json::Value;

use super::snapshots::{BinanceSnapshotProvider, BINANCE_REST_URL};
use crate::error::{ConfigurationError, TransportError};
use crate::stream::Subscription;
use crate::traits::{ExchangeAdapter, SnapshotProvider};

/// Combined-stream endpoint; stream names are appended to the URL
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream?streams=";

/// Binance spot public market data
pub struct BinanceAdapter {
    ws_url: String,
    rest_url: String,
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new(BINANCE_WS_URL, BINANCE_REST_URL)
    }
}

impl BinanceAdapter {
    pub fn new(ws_url: impl Into<String>, rest_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            rest_url: rest_url.into(),
        }
    }

    fn stream_suffix(channel: &str) -> Option<&'static str> {
        match channel {
            "trade" => Some("@trade"),
            "depth" => Some("@depth@100ms"),
            _ => None,
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> &str {
        "binance"
    }

    async fn endpoint(&self, _filters: &[Filter]) -> Result<String, TransportError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, filters: &[Filter]) -> Result<Subscription, ConfigurationError> {
        let mut streams = Vec::new();
        for filter in filters {
            let suffix = Self::stream_suffix(&filter.channel).ok_or_else(|| {
                ConfigurationError::UnsupportedChannel {
                    exchange: self.exchange().to_string(),
                    channel: filter.channel.clone(),
                }
            })?;
            if filter.symbols().is_empty() {
                return Err(ConfigurationError::MissingSymbols {
                    channel: filter.channel.clone(),
                });
            }
            for symbol in filter.symbols() {
                streams.push(format!("{}{}", symbol.to_lowercase(), suffix));
            }
        }
        Ok(Subscription::UrlSuffix(streams.join("/")))
    }

    fn is_error(&self, message: &Value) -> bool {
        message.get("error").is_some()
            || (message.get("code").is_some() && message.get("msg").is_some())
    }

    fn snapshot_provider(&self, filters: &[Filter]) -> Option<Arc<dyn SnapshotProvider>> {
        if filters.iter().any(|f| f.channel == "depth") {
            Some(Arc::new(BinanceSnapshotProvider::from_env(
                self.rest_url.clone(),
            )))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(channel: &str, symbols: &[&str]) -> Filter {
        Filter::new(
            channel,
            Some(symbols.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[test]
    fn test_url_suffix_subscription() {
        let adapter = BinanceAdapter::default();
        let subscription = adapter
            .subscribe_messages(&[
                filter("trade", &["BTCUSDT"]),
                filter("depth", &["BTCUSDT", "ethusdt"]),
            ])
            .unwrap();
        assert_eq!(
            subscription,
            Subscription::UrlSuffix(
                "btcusdt@trade/btcusdt@depth@100ms/ethusdt@depth@100ms".to_string()
            )
        );
    }

    #[test]
    fn test_channel_validation() {
        let adapter = BinanceAdapter::default();
        assert!(matches!(
            adapter.subscribe_messages(&[Filter::new("depth", None)]),
            Err(ConfigurationError::MissingSymbols { .. })
        ));
        assert!(matches!(
            adapter.subscribe_messages(&[filter("kline", &["BTCUSDT"])]),
            Err(ConfigurationError::UnsupportedChannel { .. })
        ));
    }

    #[test]
    fn test_error_predicate() {
        let adapter = BinanceAdapter::default();
        assert!(adapter.is_error(&json!({"code": -1121, "msg": "Invalid symbol."})));
        assert!(adapter.is_error(&json!({"error": {"code": 2, "msg": "Invalid request"}})));
        assert!(!adapter.is_error(&json!({"stream": "btcusdt@trade", "data": {}})));
    }

    #[test]
    fn test_snapshot_provider_only_for_depth() {
        let adapter = BinanceAdapter::default();
        assert!(adapter
            .snapshot_provider(&[filter("trade", &["BTCUSDT"])])
            .is_none());
        assert!(adapter
            .snapshot_provider(&[filter("depth", &["BTCUSDT"])])
            .is_some());
    }
}
