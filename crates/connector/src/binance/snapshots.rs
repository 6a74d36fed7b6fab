//! Manual depth snapshots over REST, paced by the account-wide request weight budget

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use mdstream_metadata::Filter;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SnapshotError;
use crate::metrics::StreamMetrics;
use crate::stream::SnapshotSink;
use crate::traits::SnapshotProvider;

pub const BINANCE_REST_URL: &str = "https://api.binance.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEPTH_LIMIT: u32 = 1000;
/// Request weight of `GET /api/v3/depth` at limit 1000
const DEPTH_REQUEST_WEIGHT: u32 = 50;
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

const DEFAULT_WEIGHT_LIMIT: u32 = 6000;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_MIN_WEIGHT_BUFFER: u32 = 10;

/// Weight used in the current minute as last reported by Binance. Shared by all
/// providers in the process since the budget is per IP.
static USED_WEIGHT: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotLimits {
    pub weight_limit: u32,
    pub concurrency: usize,
    pub min_weight_buffer: u32,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            weight_limit: DEFAULT_WEIGHT_LIMIT,
            concurrency: DEFAULT_CONCURRENCY,
            min_weight_buffer: DEFAULT_MIN_WEIGHT_BUFFER,
        }
    }
}

impl SnapshotLimits {
    /// Read `BINANCE_REQUEST_WEIGHT_LIMIT`, `BINANCE_CONCURRENCY_LIMIT` and `BINANCE_MIN_WEIGHT_BUFFER`
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            weight_limit: parse("BINANCE_REQUEST_WEIGHT_LIMIT")
                .map_or(defaults.weight_limit, |v| v as u32),
            concurrency: parse("BINANCE_CONCURRENCY_LIMIT")
                .filter(|v| *v > 0)
                .map_or(defaults.concurrency, |v| v as usize),
            min_weight_buffer: parse("BINANCE_MIN_WEIGHT_BUFFER")
                .map_or(defaults.min_weight_buffer, |v| v as u32),
        }
    }

    /// Whether a batch costing `required` would eat into the safety buffer
    pub fn needs_pause(&self, used: u32, required: u32) -> bool {
        used.saturating_add(required)
            .saturating_add(self.min_weight_buffer)
            > self.weight_limit
    }
}

fn until_next_minute() -> Duration {
    let into_minute = Utc::now().timestamp_millis().rem_euclid(60_000) as u64;
    Duration::from_millis(60_000 - into_minute)
}

/// Fetches `/api/v3/depth` for every depth symbol in batches of `concurrency`
pub struct BinanceSnapshotProvider {
    http: Client,
    rest_url: String,
    limits: SnapshotLimits,
    metrics: StreamMetrics,
}

impl BinanceSnapshotProvider {
    pub fn new(rest_url: impl Into<String>, limits: SnapshotLimits) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            rest_url: rest_url.into(),
            limits,
            metrics: StreamMetrics::new("binance"),
        }
    }

    /// Count fetched snapshots under another exchange label
    pub fn with_metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn from_env(rest_url: impl Into<String>) -> Self {
        Self::new(rest_url, SnapshotLimits::from_env())
    }

    pub fn limits(&self) -> &SnapshotLimits {
        &self.limits
    }

    async fn fetch(&self, symbol: &str) -> Result<Value, SnapshotError> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.rest_url,
            symbol.to_uppercase(),
            DEPTH_LIMIT
        );
        debug!(url = %url, "GET request");

        let resp = self.http.get(&url).send().await?;

        if let Some(used) = resp
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            USED_WEIGHT.store(used, Ordering::SeqCst);
        }

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let body = resp.text().await.unwrap_or_default();
            return Err(SnapshotError::RateLimited(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SnapshotError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| SnapshotError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SnapshotProvider for BinanceSnapshotProvider {
    async fn provide(
        &self,
        filters: &[Filter],
        sink: SnapshotSink,
        cancel: CancellationToken,
    ) -> Result<(), SnapshotError> {
        let symbols: Vec<String> = filters
            .iter()
            .filter(|f| f.channel == "depth")
            .flat_map(|f| f.symbols().iter().map(|s| s.to_lowercase()))
            .collect();

        info!(symbols = symbols.len(), "Fetching manual depth snapshots");

        for batch in symbols.chunks(self.limits.concurrency.max(1)) {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let required = DEPTH_REQUEST_WEIGHT * batch.len() as u32;
            let used = USED_WEIGHT.load(Ordering::SeqCst);
            if self.limits.needs_pause(used, required) {
                let pause = until_next_minute();
                warn!(
                    used_weight = used,
                    required_weight = required,
                    weight_limit = self.limits.weight_limit,
                    pause_ms = pause.as_millis() as u64,
                    "Request weight budget low, pausing until next minute"
                );
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => return Ok(()),
                }
                USED_WEIGHT.store(0, Ordering::SeqCst);
            }

            let results = tokio::select! {
                results = join_all(batch.iter().map(|symbol| self.fetch(symbol))) => results,
                _ = cancel.cancelled() => return Ok(()),
            };
            for (symbol, result) in batch.iter().zip(results) {
                let data = result?;
                self.metrics.inc_snapshot_fetched();
                let message = json!({
                    "stream": format!("{}@depthSnapshot", symbol),
                    "generated": true,
                    "data": data,
                });
                if !sink.push(message) {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relaxed_limits(concurrency: usize) -> SnapshotLimits {
        SnapshotLimits {
            weight_limit: u32::MAX,
            concurrency,
            min_weight_buffer: 0,
        }
    }

    fn depth_filter(symbols: &[&str]) -> Vec<Filter> {
        vec![Filter::new(
            "depth",
            Some(symbols.iter().map(|s| s.to_string()).collect()),
        )]
    }

    #[test]
    fn test_limits_from_vars() {
        let limits = SnapshotLimits::from_vars(|name| match name {
            "BINANCE_REQUEST_WEIGHT_LIMIT" => Some("1200".to_string()),
            "BINANCE_CONCURRENCY_LIMIT" => Some("0".to_string()),
            "BINANCE_MIN_WEIGHT_BUFFER" => Some("garbage".to_string()),
            _ => None,
        });
        assert_eq!(limits.weight_limit, 1200);
        assert_eq!(limits.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(limits.min_weight_buffer, DEFAULT_MIN_WEIGHT_BUFFER);

        assert_eq!(SnapshotLimits::from_vars(|_| None), SnapshotLimits::default());
    }

    #[test]
    fn test_needs_pause() {
        let limits = SnapshotLimits::default();
        assert!(!limits.needs_pause(0, 200));
        assert!(!limits.needs_pause(5790, 200));
        assert!(limits.needs_pause(5791, 200));
        assert!(limits.needs_pause(u32::MAX, 1));
    }

    #[tokio::test]
    async fn test_fetches_each_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .and(query_param("limit", "1000"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(USED_WEIGHT_HEADER, "50")
                    .set_body_json(json!({
                        "lastUpdateId": 100,
                        "bids": [["1.0", "2.0"]],
                        "asks": [["1.1", "3.0"]]
                    })),
            )
            .expect(3)
            .mount(&server)
            .await;

        let provider = BinanceSnapshotProvider::new(server.uri(), relaxed_limits(2));
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider
            .provide(
                &depth_filter(&["BTCUSDT", "ETHUSDT", "BNBUSDT"]),
                SnapshotSink::new(tx),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut streams = Vec::new();
        while let Ok(message) = rx.try_recv() {
            assert_eq!(message["generated"], true);
            assert_eq!(message["data"]["lastUpdateId"], 100);
            streams.push(message["stream"].as_str().unwrap().to_string());
        }
        assert_eq!(
            streams,
            vec![
                "btcusdt@depthSnapshot",
                "ethusdt@depthSnapshot",
                "bnbusdt@depthSnapshot"
            ]
        );
    }

    #[tokio::test]
    async fn test_counts_each_fetched_snapshot_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lastUpdateId": 7,
                "bids": [],
                "asks": []
            })))
            .mount(&server)
            .await;

        let metrics = StreamMetrics::new("binance-snapshot-count");
        let provider = BinanceSnapshotProvider::new(server.uri(), relaxed_limits(4))
            .with_metrics(metrics.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider
            .provide(
                &depth_filter(&["BTCUSDT", "ETHUSDT"]),
                SnapshotSink::new(tx),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
        assert_eq!(metrics.snapshots_fetched(), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_weight_pause() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        // zero budget forces a pause before the first batch
        let limits = SnapshotLimits {
            weight_limit: 0,
            concurrency: 1,
            min_weight_buffer: 0,
        };
        let provider = BinanceSnapshotProvider::new(server.uri(), limits);
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            provider.provide(&depth_filter(&["BTCUSDT"]), SnapshotSink::new(tx), cancel),
        )
        .await
        .expect("pause was not interrupted by cancellation");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too many requests"))
            .mount(&server)
            .await;

        let provider = BinanceSnapshotProvider::new(server.uri(), relaxed_limits(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = provider
            .provide(
                &depth_filter(&["BTCUSDT"]),
                SnapshotSink::new(tx),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(SnapshotError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
            )
            .mount(&server)
            .await;

        let provider = BinanceSnapshotProvider::new(server.uri(), relaxed_limits(1));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = provider
            .provide(
                &depth_filter(&["NOPE"]),
                SnapshotSink::new(tx),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(SnapshotError::Status { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let provider = BinanceSnapshotProvider::new(server.uri(), relaxed_limits(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider
            .provide(&depth_filter(&["BTCUSDT"]), SnapshotSink::new(tx), cancel)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
