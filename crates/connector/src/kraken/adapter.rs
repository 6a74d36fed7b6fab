use std::time::Duration;

use async_trait::async_trait;
use mdstream_metadata::Filter;
use serde_json::{json, Value};

use crate::error::{ConfigurationError, TransportError};
use crate::stream::{CustomPing, Subscription};
use crate::traits::ExchangeAdapter;

/// Kraken v2 public WebSocket URL
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Kraken drops idle connections after a minute without traffic
const PING_INTERVAL: Duration = Duration::from_secs(30);

const SUPPORTED_CHANNELS: &[&str] = &["book", "trade"];
const BOOK_DEPTH: u32 = 1000;

/// Kraken v2 public market data (no authentication)
pub struct KrakenAdapter {
    ws_url: String,
}

impl Default for KrakenAdapter {
    fn default() -> Self {
        Self::new(KRAKEN_WS_URL)
    }
}

impl KrakenAdapter {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn exchange(&self) -> &str {
        "kraken"
    }

    async fn endpoint(&self, _filters: &[Filter]) -> Result<String, TransportError> {
        Ok(self.ws_url.clone())
    }

    /// One `{"method":"subscribe","params":{"channel":..,"symbol":[..]}}` per filter
    fn subscribe_messages(&self, filters: &[Filter]) -> Result<Subscription, ConfigurationError> {
        let mut messages = Vec::with_capacity(filters.len());
        for filter in filters {
            if !SUPPORTED_CHANNELS.contains(&filter.channel.as_str()) {
                return Err(ConfigurationError::UnsupportedChannel {
                    exchange: self.exchange().to_string(),
                    channel: filter.channel.clone(),
                });
            }
            if filter.symbols().is_empty() {
                return Err(ConfigurationError::MissingSymbols {
                    channel: filter.channel.clone(),
                });
            }

            let mut params = json!({
                "channel": filter.channel,
                "symbol": filter.symbols(),
            });
            match filter.channel.as_str() {
                "book" => params["depth"] = json!(BOOK_DEPTH),
                // recent-trade history would replay as live trades after a reconnect
                "trade" => params["snapshot"] = json!(false),
                _ => {}
            }
            messages.push(json!({ "method": "subscribe", "params": params }).to_string());
        }
        Ok(Subscription::Messages(messages))
    }

    fn is_error(&self, message: &Value) -> bool {
        message.get("success") == Some(&Value::Bool(false)) || message.get("error").is_some()
    }

    fn is_heartbeat(&self, message: &Value) -> bool {
        message.get("channel").and_then(Value::as_str) == Some("heartbeat")
            || message.get("method").and_then(Value::as_str) == Some("pong")
    }

    fn custom_ping(&self) -> Option<CustomPing> {
        Some(CustomPing {
            interval: PING_INTERVAL,
            payload: json!({ "method": "ping" }).to_string(),
        })
    }
}
