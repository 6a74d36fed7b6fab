//! Kraken v2 WebSocket message types
//!
//! Uses `#[serde(untagged)]` since Kraken messages don't have a single consistent tag field.

use serde::Deserialize;
use serde_json::Value;

/// Incoming WebSocket messages from Kraken v2 API
///
/// Variant order matters for `#[serde(untagged)]` - serde tries each in order.
/// ChannelMessage (has `data`) must come before Heartbeat (no `data`) since both
/// share `channel` and `type` fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KrakenWsMessage {
    /// Channel data message (book, trade, etc.)
    ChannelMessage {
        channel: String,
        #[serde(rename = "type")]
        msg_type: String,
        data: Vec<Value>,
    },
    /// Method response (subscribe, pong)
    MethodResponse {
        method: String,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Heartbeat (channel=heartbeat, no data field)
    Heartbeat {
        channel: String,
    },
}

/// Kraken trade data
#[derive(Debug, Clone, Deserialize)]
pub struct KrakenTradeData {
    pub symbol: String,
    pub side: String,
    pub price: f64,
    pub qty: f64,
    #[serde(default)]
    pub ord_type: Option<String>,
    /// Integer on the live API, string in some older payloads
    #[serde(default)]
    pub trade_id: Option<Value>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct KrakenLevel {
    pub price: f64,
    pub qty: f64,
}

/// Kraken book data; snapshots carry no timestamp
#[derive(Debug, Clone, Deserialize)]
pub struct KrakenBookData {
    pub symbol: String,
    #[serde(default)]
    pub bids: Vec<KrakenLevel>,
    #[serde(default)]
    pub asks: Vec<KrakenLevel>,
    #[serde(default)]
    pub checksum: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADE_MESSAGE: &str = r#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD","side":"buy","price":97000.0,"qty":0.001,"ord_type":"market","trade_id":12345,"timestamp":"2026-02-06T12:00:00.000000Z"}]}"#;
    const BOOK_SNAPSHOT: &str = r#"{"channel":"book","type":"snapshot","data":[{"symbol":"BTC/USD","bids":[{"price":97000.0,"qty":1.5}],"asks":[{"price":97000.1,"qty":0.25}],"checksum":2439117997}]}"#;
    const HEARTBEAT_MESSAGE: &str = r#"{"channel":"heartbeat"}"#;
    const PONG_MESSAGE: &str = r#"{"method":"pong","time_in":"2026-02-06T12:00:00.000000Z","time_out":"2026-02-06T12:00:00.000001Z"}"#;
    const SUBSCRIBE_FAILED: &str = r#"{"method":"subscribe","success":false,"error":"Currency pair not supported XBT/FOO","time_in":"2026-02-06T12:00:00.000000Z","time_out":"2026-02-06T12:00:00.000001Z"}"#;

    #[test]
    fn test_parse_trade_message() {
        let msg: KrakenWsMessage =
            serde_json::from_str(TRADE_MESSAGE).expect("Failed to parse trade");

        match msg {
            KrakenWsMessage::ChannelMessage {
                channel,
                msg_type,
                data,
            } => {
                assert_eq!(channel, "trade");
                assert_eq!(msg_type, "update");
                let trade: KrakenTradeData =
                    serde_json::from_value(data[0].clone()).expect("Failed to parse trade data");
                assert_eq!(trade.symbol, "BTC/USD");
                assert_eq!(trade.side, "buy");
                assert_eq!(trade.qty, 0.001);
                assert_eq!(trade.trade_id, Some(serde_json::json!(12345)));
            }
            _ => panic!("Expected ChannelMessage variant, got {:?}", msg),
        }
    }

    #[test]
    fn test_parse_book_snapshot() {
        let msg: KrakenWsMessage =
            serde_json::from_str(BOOK_SNAPSHOT).expect("Failed to parse book");

        match msg {
            KrakenWsMessage::ChannelMessage { msg_type, data, .. } => {
                assert_eq!(msg_type, "snapshot");
                let book: KrakenBookData =
                    serde_json::from_value(data[0].clone()).expect("Failed to parse book data");
                assert_eq!(book.bids[0].price, 97000.0);
                assert_eq!(book.asks[0].qty, 0.25);
                assert!(book.timestamp.is_none());
            }
            _ => panic!("Expected ChannelMessage variant, got {:?}", msg),
        }
    }

    #[test]
    fn test_parse_heartbeat_message() {
        let msg: KrakenWsMessage =
            serde_json::from_str(HEARTBEAT_MESSAGE).expect("Failed to parse heartbeat");
        assert!(matches!(msg, KrakenWsMessage::Heartbeat { channel } if channel == "heartbeat"));
    }

    #[test]
    fn test_parse_method_responses() {
        let msg: KrakenWsMessage =
            serde_json::from_str(PONG_MESSAGE).expect("Failed to parse pong");
        assert!(matches!(msg, KrakenWsMessage::MethodResponse { ref method, .. } if method == "pong"));

        let msg: KrakenWsMessage =
            serde_json::from_str(SUBSCRIBE_FAILED).expect("Failed to parse failed subscribe");
        match msg {
            KrakenWsMessage::MethodResponse { success, error, .. } => {
                assert_eq!(success, Some(false));
                assert!(error.unwrap().contains("not supported"));
            }
            _ => panic!("Expected MethodResponse variant"),
        }
    }
}
