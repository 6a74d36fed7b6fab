use std::collections::HashMap;

use futures_util::stream::{self, Stream, StreamExt};
use mdstream_metadata::ComputeConfig;
use tracing::debug;

use super::{Aggregator, AggregatorFactory, ConfigFactory};
use crate::error::ConfigurationError;
use crate::message::Message;

type Registry = HashMap<String, HashMap<String, Vec<Box<dyn Aggregator>>>>;

/// Routes normalized messages to per-(exchange, key) aggregators.
///
/// Every input is passed through first, followed by whatever it produced.
/// A disconnect drops all aggregator state for its exchange.
pub struct Dispatcher {
    factories: Vec<Box<dyn AggregatorFactory>>,
    registry: Registry,
}

impl Dispatcher {
    pub fn new(factories: Vec<Box<dyn AggregatorFactory>>) -> Self {
        Self {
            factories,
            registry: HashMap::new(),
        }
    }

    pub fn from_configs(configs: &[ComputeConfig]) -> Result<Self, ConfigurationError> {
        let mut factories: Vec<Box<dyn AggregatorFactory>> = Vec::with_capacity(configs.len());
        for config in configs {
            factories.push(Box::new(ConfigFactory::new(config)?));
        }
        Ok(Self::new(factories))
    }

    pub fn has_factories(&self) -> bool {
        !self.factories.is_empty()
    }

    /// Number of live aggregator keys for an exchange
    pub fn active_keys(&self, exchange: &str) -> usize {
        self.registry.get(exchange).map_or(0, HashMap::len)
    }

    pub fn process(&mut self, message: Message) -> Vec<Message> {
        if let Message::Disconnect(disconnect) = &message {
            if self.registry.remove(&disconnect.exchange).is_some() {
                debug!(exchange = %disconnect.exchange, "Dropped aggregator state");
            }
            return vec![message];
        }

        if self.factories.is_empty() {
            return vec![message];
        }

        let key = match (message.symbol(), message.name()) {
            (Some(symbol), Some(name)) => format!("{}:{}", symbol, name),
            (Some(symbol), None) => symbol.to_string(),
            (None, _) => return vec![message],
        };

        let factories = &self.factories;
        let aggregators = self
            .registry
            .entry(message.exchange().to_string())
            .or_default()
            .entry(key)
            .or_insert_with(|| factories.iter().map(|f| f.create()).collect());

        let message_type = message.message_type();
        let mut derived = Vec::new();
        for aggregator in aggregators.iter_mut() {
            if aggregator.source_types().contains(&message_type) {
                derived.extend(aggregator.compute(&message));
            }
        }

        let mut out = Vec::with_capacity(derived.len() + 1);
        out.push(message);
        out.extend(derived);
        out
    }
}

/// Wrap a message stream so every item is followed by the records it produced
pub fn compute_stream<S>(messages: S, mut dispatcher: Dispatcher) -> impl Stream<Item = Message>
where
    S: Stream<Item = Message>,
{
    messages.flat_map(move |message| stream::iter(dispatcher.process(message)))
}
