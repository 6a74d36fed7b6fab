//! Registry from exchange id to its adapter and mapper

use std::sync::Arc;

use crate::binance::{BinanceAdapter, BinanceMapper, BINANCE_REST_URL};
use crate::kraken::{KrakenAdapter, KrakenMapper, KRAKEN_WS_URL};
use crate::traits::{ExchangeAdapter, Mapper};

pub const SUPPORTED_EXCHANGES: &[&str] = &["kraken", "binance"];

/// Everything needed to stream and normalize one exchange
pub struct Exchange {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub mapper: Box<dyn Mapper>,
}

impl Exchange {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, mapper: Box<dyn Mapper>) -> Self {
        Self { adapter, mapper }
    }

    pub fn name(&self) -> &str {
        self.adapter.exchange()
    }
}

/// Look up an exchange by id, optionally overriding its websocket URL
pub fn exchange_for(name: &str, ws_url: Option<&str>) -> Option<Exchange> {
    match name {
        "kraken" => Some(Exchange::new(
            Arc::new(KrakenAdapter::new(ws_url.unwrap_or(KRAKEN_WS_URL))),
            Box::new(KrakenMapper::new()),
        )),
        "binance" => {
            let adapter = match ws_url {
                Some(url) => BinanceAdapter::new(url, BINANCE_REST_URL),
                None => BinanceAdapter::default(),
            };
            Some(Exchange::new(
                Arc::new(adapter),
                Box::new(BinanceMapper::new()),
            ))
        }
        _ => None,
    }
}
