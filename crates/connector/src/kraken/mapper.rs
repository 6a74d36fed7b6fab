use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

use super::messages::{KrakenBookData, KrakenLevel, KrakenTradeData, KrakenWsMessage};
use crate::message::{BookChange, Message, PriceLevel, Trade, TradeSide};
use crate::traits::Mapper;

const EXCHANGE: &str = "kraken";

/// Maps Kraken v2 `book` and `trade` channel messages
#[derive(Debug, Default)]
pub struct KrakenMapper;

impl KrakenMapper {
    pub fn new() -> Self {
        Self
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn levels(raw: &[KrakenLevel]) -> Vec<PriceLevel> {
    raw.iter()
        .map(|level| PriceLevel::new(level.price, level.qty))
        .collect()
}

fn map_trade(data: KrakenTradeData, local_timestamp: DateTime<Utc>) -> Message {
    let side = match data.side.as_str() {
        "buy" => TradeSide::Buy,
        "sell" => TradeSide::Sell,
        _ => TradeSide::Unknown,
    };
    let id = data.trade_id.map(|id| match id {
        Value::String(s) => s,
        other => other.to_string(),
    });

    Message::Trade(Trade {
        symbol: data.symbol,
        exchange: EXCHANGE.to_string(),
        id,
        price: data.price,
        amount: data.qty,
        side,
        timestamp: parse_timestamp(&data.timestamp).unwrap_or(local_timestamp),
        local_timestamp,
    })
}

fn map_book(data: KrakenBookData, is_snapshot: bool, local_timestamp: DateTime<Utc>) -> Message {
    let timestamp = data
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(local_timestamp);

    Message::BookChange(BookChange {
        symbol: data.symbol,
        exchange: EXCHANGE.to_string(),
        is_snapshot,
        bids: levels(&data.bids),
        asks: levels(&data.asks),
        timestamp,
        local_timestamp,
    })
}

impl Mapper for KrakenMapper {
    fn map(&mut self, message: &Value, local_timestamp: DateTime<Utc>) -> Vec<Message> {
        let (channel, msg_type, data) = match KrakenWsMessage::deserialize(message) {
            Ok(KrakenWsMessage::ChannelMessage {
                channel,
                msg_type,
                data,
            }) => (channel, msg_type, data),
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to parse Kraken message");
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            match channel.as_str() {
                "trade" => match KrakenTradeData::deserialize(&item) {
                    Ok(trade) => out.push(map_trade(trade, local_timestamp)),
                    Err(e) => warn!(error = %e, "Failed to parse Kraken trade"),
                },
                "book" => match KrakenBookData::deserialize(&item) {
                    Ok(book) => out.push(map_book(book, msg_type == "snapshot", local_timestamp)),
                    Err(e) => warn!(error = %e, "Failed to parse Kraken book"),
                },
                other => {
                    trace!(channel = %other, "Ignoring Kraken channel");
                    break;
                }
            }
        }
        out
    }
}
