use std::sync::Arc;

use mdstream_metadata::Feed;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::compute::Dispatcher;
use crate::error::{ConfigurationError, WriterError};
use crate::exchange::Exchange;
use crate::message::Message;
use crate::metrics::StreamMetrics;
use crate::stream::{StreamEvent, StreamOptions, StreamStatus, StreamingClient};
use crate::traits::{Mapper, Writer};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Runner orchestrates the pipeline: stream, normalize, compute, write
pub struct Runner<W: Writer> {
    exchange: String,
    client: StreamingClient,
    mapper: Box<dyn Mapper>,
    dispatcher: Dispatcher,
    writer: W,
    metrics: StreamMetrics,
}

impl<W: Writer> Runner<W> {
    pub fn new(feed: &Feed, exchange: Exchange, writer: W) -> Result<Self, ConfigurationError> {
        let options = StreamOptions {
            staleness_timeout: feed.staleness_timeout(),
            snapshot_settle_delay: feed.snapshot_settle_delay(),
        };
        let name = exchange.name().to_string();
        let client = StreamingClient::new(exchange.adapter, feed.filters.clone(), options)?;
        let dispatcher = Dispatcher::from_configs(&feed.compute)?;

        Ok(Self {
            metrics: StreamMetrics::new(name.as_str()),
            exchange: name,
            client,
            mapper: exchange.mapper,
            dispatcher,
            writer,
        })
    }

    /// Returns a handle to the stream status for the health server
    pub fn status_handle(&self) -> Arc<StreamStatus> {
        self.client.status_handle()
    }

    /// Run until shutdown. Write failures are fatal.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), WriterError> {
        let Runner {
            exchange,
            client,
            mut mapper,
            mut dispatcher,
            mut writer,
            metrics,
        } = self;

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client_task = tokio::spawn(client.run(tx, shutdown.clone()));
        info!(exchange = %exchange, "Runner started");

        let mut shutdown = shutdown;
        let result = loop {
            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break Ok(());
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        warn!(exchange = %exchange, "Stream ended");
                        break Ok(());
                    };
                    let messages = match event {
                        StreamEvent::Message { message, local_timestamp } => {
                            mapper.map(&message, local_timestamp)
                        }
                        StreamEvent::Disconnect(disconnect) => {
                            mapper.reset();
                            vec![Message::Disconnect(disconnect)]
                        }
                    };
                    if let Err(e) = emit(messages, &mut dispatcher, &mut writer, &metrics).await {
                        error!(error = %e, "Failed to write message - exiting");
                        break Err(e);
                    }
                }
            }
        };

        drop(rx);
        client_task.abort();
        let _ = client_task.await;

        writer.close().await?;
        info!(exchange = %exchange, "Runner stopped");
        result
    }
}

async fn emit<W: Writer>(
    messages: Vec<Message>,
    dispatcher: &mut Dispatcher,
    writer: &mut W,
    metrics: &StreamMetrics,
) -> Result<(), WriterError> {
    for message in messages {
        for out in dispatcher.process(message) {
            metrics.inc_message(out.message_type().as_str());
            writer.write(&out).await?;
        }
    }
    Ok(())
}
