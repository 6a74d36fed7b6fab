use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::messages::{BinanceDepthSnapshot, BinanceDepthUpdate, BinanceTrade};
use crate::message::{BookChange, Message, PriceLevel, Trade, TradeSide};
use crate::traits::Mapper;

const EXCHANGE: &str = "binance";
/// Oldest diffs are dropped past this while waiting for a snapshot
const MAX_BUFFERED_DIFFS: usize = 10_000;

/// Per-symbol depth state: diffs are held back until the REST snapshot arrives
#[derive(Debug, Default)]
struct DepthState {
    /// Final update id applied so far; `None` while unsynchronized
    last_update_id: Option<u64>,
    buffered: VecDeque<BinanceDepthUpdate>,
}

impl DepthState {
    fn buffer(&mut self, update: BinanceDepthUpdate) {
        if self.buffered.len() == MAX_BUFFERED_DIFFS {
            self.buffered.pop_front();
        }
        self.buffered.push_back(update);
    }

    /// Applies a diff if it continues the sequence. A gap desynchronizes the
    /// symbol: diffs are buffered again until the next snapshot.
    fn advance(
        &mut self,
        update: BinanceDepthUpdate,
        local_timestamp: DateTime<Utc>,
    ) -> Option<Message> {
        let Some(last) = self.last_update_id else {
            self.buffer(update);
            return None;
        };
        if update.final_update_id <= last {
            return None;
        }
        if update.first_update_id > last + 1 {
            warn!(
                symbol = %update.symbol,
                expected = last + 1,
                first_update_id = update.first_update_id,
                "Depth sequence gap, waiting for a new snapshot"
            );
            self.last_update_id = None;
            self.buffer(update);
            return None;
        }
        self.last_update_id = Some(update.final_update_id);
        Some(diff_change(&update, local_timestamp))
    }
}

/// Maps Binance combined-stream trades and depth diffs.
///
/// Depth diffs are only emitted once the manual snapshot for the symbol has
/// been seen; older diffs are dropped and newer buffered ones replayed.
#[derive(Debug, Default)]
pub struct BinanceMapper {
    depth: HashMap<String, DepthState>,
}

impl BinanceMapper {
    pub fn new() -> Self {
        Self::default()
    }
}

fn from_millis(millis: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(fallback)
}

fn levels(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|[price, amount]| {
            Some(PriceLevel::new(price.parse().ok()?, amount.parse().ok()?))
        })
        .collect()
}

fn map_trade(trade: BinanceTrade, local_timestamp: DateTime<Utc>) -> Option<Message> {
    Some(Message::Trade(Trade {
        symbol: trade.symbol,
        exchange: EXCHANGE.to_string(),
        id: Some(trade.trade_id.to_string()),
        price: trade.price.parse().ok()?,
        amount: trade.quantity.parse().ok()?,
        side: if trade.buyer_is_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        },
        timestamp: from_millis(trade.trade_time, local_timestamp),
        local_timestamp,
    }))
}

fn diff_change(update: &BinanceDepthUpdate, local_timestamp: DateTime<Utc>) -> Message {
    Message::BookChange(BookChange {
        symbol: update.symbol.clone(),
        exchange: EXCHANGE.to_string(),
        is_snapshot: false,
        bids: levels(&update.bids),
        asks: levels(&update.asks),
        timestamp: from_millis(update.event_time, local_timestamp),
        local_timestamp,
    })
}

impl BinanceMapper {
    fn map_depth(
        &mut self,
        update: BinanceDepthUpdate,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<Message> {
        let state = self.depth.entry(update.symbol.clone()).or_default();
        state.advance(update, local_timestamp).into_iter().collect()
    }

    fn map_snapshot(
        &mut self,
        symbol: String,
        snapshot: BinanceDepthSnapshot,
        local_timestamp: DateTime<Utc>,
    ) -> Vec<Message> {
        let state = self.depth.entry(symbol.clone()).or_default();
        state.last_update_id = Some(snapshot.last_update_id);

        let mut out = vec![Message::BookChange(BookChange {
            symbol,
            exchange: EXCHANGE.to_string(),
            is_snapshot: true,
            bids: levels(&snapshot.bids),
            asks: levels(&snapshot.asks),
            timestamp: local_timestamp,
            local_timestamp,
        })];

        let buffered = std::mem::take(&mut state.buffered);
        let total = buffered.len();
        for update in buffered {
            out.extend(state.advance(update, local_timestamp));
        }
        debug!(
            last_update_id = snapshot.last_update_id,
            buffered = total,
            replayed = out.len() - 1,
            "Applied depth snapshot"
        );
        out
    }
}

impl Mapper for BinanceMapper {
    fn map(&mut self, message: &Value, local_timestamp: DateTime<Utc>) -> Vec<Message> {
        let (Some(stream), Some(data)) = (
            message.get("stream").and_then(Value::as_str),
            message.get("data"),
        ) else {
            return Vec::new();
        };

        let Some((symbol, kind)) = stream.split_once('@') else {
            return Vec::new();
        };

        let result: Result<Vec<Message>, serde_json::Error> = match kind {
            "trade" => BinanceTrade::deserialize(data)
                .map(|trade| map_trade(trade, local_timestamp).into_iter().collect()),
            "depthSnapshot" => BinanceDepthSnapshot::deserialize(data).map(|snapshot| {
                self.map_snapshot(symbol.to_uppercase(), snapshot, local_timestamp)
            }),
            k if k.starts_with("depth") => BinanceDepthUpdate::deserialize(data)
                .map(|update| self.map_depth(update, local_timestamp)),
            _ => return Vec::new(),
        };

        result.unwrap_or_else(|e| {
            warn!(stream = %stream, error = %e, "Failed to parse Binance message");
            Vec::new()
        })
    }

    fn reset(&mut self) {
        self.depth.clear();
    }
}
