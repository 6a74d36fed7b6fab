use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use mdstream_metadata::{Filter, DEFAULT_SNAPSHOT_SETTLE_DELAY_MS};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{Backoff, SnapshotSink, StreamStatus, Subscription};
use crate::error::{ConfigurationError, SnapshotError, TransportError};
use crate::message::Disconnect;
use crate::metrics::StreamMetrics;
use crate::traits::ExchangeAdapter;

/// Item yielded by the streaming client
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Raw exchange payload, already decompressed and parsed
    Message {
        message: Value,
        local_timestamp: DateTime<Utc>,
    },
    /// A connection cycle ended; per-connection state downstream is stale
    Disconnect(Disconnect),
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Force a reconnect when a whole window passes without any frame
    pub staleness_timeout: Option<Duration>,
    /// Wait after subscribing before the manual snapshot provider starts
    pub snapshot_settle_delay: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            staleness_timeout: None,
            snapshot_settle_delay: Duration::from_millis(DEFAULT_SNAPSHOT_SETTLE_DELAY_MS),
        }
    }
}

/// Snapshot task state owned by one connection cycle
#[derive(Default)]
struct CycleGuard {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), SnapshotError>>>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Reconnecting websocket client driving one subscription against one exchange
pub struct StreamingClient {
    adapter: Arc<dyn ExchangeAdapter>,
    filters: Vec<Filter>,
    subscription: Subscription,
    options: StreamOptions,
    status: Arc<StreamStatus>,
    metrics: StreamMetrics,
}

impl StreamingClient {
    /// Validates the subscription up front; configuration errors are never retried
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        filters: Vec<Filter>,
        options: StreamOptions,
    ) -> Result<Self, ConfigurationError> {
        if filters.is_empty() {
            return Err(ConfigurationError::NoFilters);
        }
        let subscription = adapter.subscribe_messages(&filters)?;
        let metrics = StreamMetrics::new(adapter.exchange());

        Ok(Self {
            adapter,
            filters,
            subscription,
            options,
            status: Arc::new(StreamStatus::new()),
            metrics,
        })
    }

    pub fn exchange(&self) -> &str {
        self.adapter.exchange()
    }

    /// Returns a handle to the live connection status
    pub fn status_handle(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Stream until shutdown or until the receiving side of `tx` is dropped.
    ///
    /// Every ended connection cycle yields one [`StreamEvent::Disconnect`].
    pub async fn run(self, tx: mpsc::Sender<StreamEvent>, mut shutdown: watch::Receiver<bool>) {
        let exchange = self.adapter.exchange().to_string();
        let mut backoff = Backoff::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                result = self.connect_and_stream(&tx, &mut backoff) => result,
                _ = shutdown.changed() => {
                    info!(exchange = %exchange, "Shutdown signal received, closing stream");
                    break;
                }
            };

            self.status.set_disconnected();
            self.metrics.set_disconnected();

            let rate_limited = match result {
                Ok(()) => {
                    info!(exchange = %exchange, "Consumer dropped, stopping stream");
                    break;
                }
                Err(e) => {
                    warn!(exchange = %exchange, error = %e, "Connection cycle ended");
                    e.is_rate_limited()
                }
            };

            self.status.record_disconnect();
            if tx
                .send(StreamEvent::Disconnect(Disconnect::now(exchange.as_str())))
                .await
                .is_err()
            {
                break;
            }

            self.metrics.inc_reconnect();
            let delay = backoff.on_failure(rate_limited);
            warn!(
                exchange = %exchange,
                delay_secs = delay.as_secs(),
                retries = backoff.retries(),
                rate_limited,
                "Reconnecting after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!(exchange = %exchange, "Shutdown signal received during backoff");
                    break;
                }
            }
        }

        self.status.set_disconnected();
        self.metrics.set_disconnected();
    }

    /// One connection cycle. `Ok(())` means the consumer went away.
    async fn connect_and_stream(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        backoff: &mut Backoff,
    ) -> Result<(), TransportError> {
        let exchange = self.adapter.exchange();
        let mut url = self.adapter.endpoint(&self.filters).await?;
        if let Subscription::UrlSuffix(suffix) = &self.subscription {
            url.push_str(suffix);
        }
        Url::parse(&url).map_err(|e| TransportError::Endpoint(format!("{}: {}", url, e)))?;

        info!(exchange = %exchange, url = %url, "Connecting");
        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(TransportError::from_handshake)?;
        info!(exchange = %exchange, status = ?response.status(), "WebSocket connected");

        let (mut write, mut read) = ws.split();

        if let Subscription::Messages(messages) = &self.subscription {
            for message in messages {
                debug!(exchange = %exchange, cmd = %message, "Sending subscribe command");
                write.send(WsMessage::Text(message.clone())).await?;
            }
        }

        self.status.set_connected();
        self.metrics.set_connected();

        let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel::<Value>();
        let mut guard = CycleGuard::default();
        if let Some(provider) = self.adapter.snapshot_provider(&self.filters) {
            let filters = self.filters.clone();
            let sink = SnapshotSink::new(snapshot_tx);
            let cancel = guard.cancel.clone();
            let settle_delay = self.options.snapshot_settle_delay;
            guard.task = Some(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(settle_delay) => {}
                    _ = cancel.cancelled() => return Ok(()),
                }
                provider.provide(&filters, sink, cancel).await
            }));
        }

        let staleness_timeout = self.options.staleness_timeout;
        let mut staleness = staleness_timeout.map(every);
        let mut frames_in_window: u64 = 0;

        let custom_ping = self.adapter.custom_ping();
        let mut ping = custom_ping.as_ref().map(|p| every(p.interval));

        loop {
            tokio::select! {
                frame = read.next() => {
                    let frame = match frame {
                        Some(frame) => frame?,
                        None => return Err(TransportError::Closed),
                    };

                    let payload = match frame {
                        WsMessage::Text(text) => text.into_bytes(),
                        WsMessage::Binary(data) => data,
                        WsMessage::Ping(data) => {
                            trace!("Received WS ping, sending pong");
                            frames_in_window += 1;
                            write.send(WsMessage::Pong(data)).await?;
                            continue;
                        }
                        WsMessage::Close(frame) => {
                            info!(exchange = %exchange, frame = ?frame, "WebSocket closed");
                            return Err(TransportError::Closed);
                        }
                        _ => continue,
                    };
                    frames_in_window += 1;
                    let local_timestamp = Utc::now();
                    self.status.record_frame(local_timestamp);

                    let payload = self.adapter.decompress(payload)?;
                    let message: Value = match serde_json::from_slice(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(
                                exchange = %exchange,
                                error = %e,
                                raw = %String::from_utf8_lossy(&payload),
                                "Skipping malformed frame"
                            );
                            continue;
                        }
                    };

                    if let Some(reply) = self.adapter.on_message(&message) {
                        write.send(WsMessage::Text(reply)).await?;
                    }

                    if self.adapter.is_error(&message) {
                        return Err(TransportError::Exchange(message.to_string()));
                    }

                    if self.adapter.is_heartbeat(&message) {
                        trace!(exchange = %exchange, "Heartbeat");
                        self.metrics.inc_heartbeat();
                        continue;
                    }

                    trace!(exchange = %exchange, msg = %message, "Received message");
                    self.metrics.inc_frame();
                    if tx.send(StreamEvent::Message { message, local_timestamp }).await.is_err() {
                        return Ok(());
                    }
                    backoff.on_success();

                    while let Ok(snapshot) = snapshot_rx.try_recv() {
                        let event = StreamEvent::Message {
                            message: snapshot,
                            local_timestamp: Utc::now(),
                        };
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                _ = tick(&mut staleness) => {
                    if frames_in_window == 0 {
                        let timeout = staleness_timeout.unwrap_or_default();
                        warn!(exchange = %exchange, timeout_ms = timeout.as_millis() as u64, "Stream went stale");
                        return Err(TransportError::Stale(timeout));
                    }
                    frames_in_window = 0;
                }
                _ = tick(&mut ping) => {
                    if let Some(ping) = &custom_ping {
                        trace!(exchange = %exchange, "Sending custom ping");
                        write.send(WsMessage::Text(ping.payload.clone())).await?;
                    }
                }
                result = join(&mut guard.task) => {
                    guard.task = None;
                    match result {
                        Ok(Ok(())) => debug!(exchange = %exchange, "Manual snapshots fetched"),
                        Ok(Err(e)) => return Err(e.into()),
                        Err(e) => warn!(exchange = %exchange, error = %e, "Snapshot task failed"),
                    }
                }
            }
        }
    }
}

/// Interval whose first tick is one period from now
fn every(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn join<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::CustomPing;
    use crate::traits::SnapshotProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    struct TestAdapter {
        url: String,
        snapshots: bool,
        ping: Option<CustomPing>,
    }

    impl TestAdapter {
        fn new(url: String) -> Self {
            Self {
                url,
                snapshots: false,
                ping: None,
            }
        }
    }

    struct TestSnapshots;

    #[async_trait]
    impl SnapshotProvider for TestSnapshots {
        async fn provide(
            &self,
            _filters: &[Filter],
            sink: SnapshotSink,
            _cancel: CancellationToken,
        ) -> Result<(), SnapshotError> {
            sink.push(json!({"snapshot": true}));
            Ok(())
        }
    }

    #[async_trait]
    impl ExchangeAdapter for TestAdapter {
        fn exchange(&self) -> &str {
            "test"
        }

        async fn endpoint(&self, _filters: &[Filter]) -> Result<String, TransportError> {
            Ok(self.url.clone())
        }

        fn subscribe_messages(
            &self,
            filters: &[Filter],
        ) -> Result<Subscription, ConfigurationError> {
            if filters[0].symbols().is_empty() {
                return Err(ConfigurationError::MissingSymbols {
                    channel: filters[0].channel.clone(),
                });
            }
            Ok(Subscription::Messages(vec![json!({"op": "subscribe"}).to_string()]))
        }

        fn is_error(&self, message: &Value) -> bool {
            message.get("error").is_some()
        }

        fn is_heartbeat(&self, message: &Value) -> bool {
            message.get("heartbeat").is_some()
        }

        fn custom_ping(&self) -> Option<CustomPing> {
            self.ping.clone()
        }

        fn snapshot_provider(&self, _filters: &[Filter]) -> Option<Arc<dyn SnapshotProvider>> {
            if self.snapshots {
                Some(Arc::new(TestSnapshots))
            } else {
                None
            }
        }
    }

    fn filters() -> Vec<Filter> {
        vec![Filter::new("trade", Some(vec!["BTC".to_string()]))]
    }

    fn options() -> StreamOptions {
        StreamOptions {
            staleness_timeout: None,
            snapshot_settle_delay: Duration::from_millis(0),
        }
    }

    /// Accepts connections forever; each one gets `frames` and is then held open or closed.
    async fn serve(frames: Vec<String>, close_after: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let frames = frames.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    // subscribe command
                    let _ = ws.next().await;
                    for frame in frames {
                        ws.send(WsMessage::Text(frame)).await.unwrap();
                    }
                    if close_after {
                        let _ = ws.close(None).await;
                    } else {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        (format!("ws://{}", addr), connections)
    }

    async fn next_event(rx: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
    }

    #[test]
    fn test_configuration_error_is_fatal() {
        let adapter = Arc::new(TestAdapter::new("ws://127.0.0.1:1".into()));
        let result = StreamingClient::new(
            adapter.clone(),
            vec![Filter::new("trade", None)],
            options(),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingSymbols { .. })
        ));

        let result = StreamingClient::new(adapter, Vec::new(), options());
        assert!(matches!(result, Err(ConfigurationError::NoFilters)));
    }

    #[tokio::test]
    async fn test_forwards_messages_and_skips_heartbeats() {
        let (url, _) = serve(
            vec![
                json!({"heartbeat": 1}).to_string(),
                "not json".to_string(),
                json!({"price": 1}).to_string(),
            ],
            false,
        )
        .await;

        let client =
            StreamingClient::new(Arc::new(TestAdapter::new(url)), filters(), options()).unwrap();
        let status = client.status_handle();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(client.run(tx, shutdown_rx));

        match next_event(&mut rx).await {
            StreamEvent::Message { message, .. } => assert_eq!(message, json!({"price": 1})),
            other => panic!("Expected message, got {:?}", other),
        }
        assert!(status.is_connected());
        assert!(status.last_frame_age_ms(Utc::now()).is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!status.is_connected());
        assert_eq!(status.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_error_payload_emits_disconnect_and_reconnects() {
        let (url, connections) = serve(
            vec![
                json!({"price": 1}).to_string(),
                json!({"error": "bad"}).to_string(),
            ],
            false,
        )
        .await;

        let client =
            StreamingClient::new(Arc::new(TestAdapter::new(url)), filters(), options()).unwrap();
        let status = client.status_handle();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(client.run(tx, shutdown_rx));

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Message { .. }));
        match next_event(&mut rx).await {
            StreamEvent::Disconnect(d) => assert_eq!(d.exchange, "test"),
            other => panic!("Expected disconnect, got {:?}", other),
        }
        assert_eq!(status.disconnects(), 1);

        // retries reset after the forwarded message, so the first backoff is 1s
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Message { .. }));
        assert_eq!(connections.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_emits_disconnect() {
        let (url, _) = serve(vec![json!({"price": 1}).to_string()], true).await;

        let client =
            StreamingClient::new(Arc::new(TestAdapter::new(url)), filters(), options()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(client.run(tx, shutdown_rx));

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Message { .. }));
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Disconnect(_)));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_snapshots_flushed_after_next_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            // by the first custom ping the snapshot has been buffered
            while let Some(Ok(frame)) = ws.next().await {
                if let WsMessage::Text(text) = frame {
                    if text.contains("ping") {
                        break;
                    }
                }
            }
            ws.send(WsMessage::Text(json!({"live": 1}).to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let adapter = TestAdapter {
            url: format!("ws://{}", addr),
            snapshots: true,
            ping: Some(CustomPing {
                interval: Duration::from_millis(50),
                payload: json!({"ping": true}).to_string(),
            }),
        };
        let client = StreamingClient::new(Arc::new(adapter), filters(), options()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(client.run(tx, shutdown_rx));

        match next_event(&mut rx).await {
            StreamEvent::Message { message, .. } => assert_eq!(message, json!({"live": 1})),
            other => panic!("Expected live message, got {:?}", other),
        }
        match next_event(&mut rx).await {
            StreamEvent::Message { message, .. } => {
                assert_eq!(message, json!({"snapshot": true}))
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
        // flushing is not fetching; only providers count snapshots
        assert_eq!(StreamMetrics::new("test").snapshots_fetched(), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_staleness_forces_reconnect() {
        let (url, connections) = serve(Vec::new(), false).await;

        let options = StreamOptions {
            staleness_timeout: Some(Duration::from_millis(100)),
            snapshot_settle_delay: Duration::from_millis(0),
        };
        let client =
            StreamingClient::new(Arc::new(TestAdapter::new(url)), filters(), options).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(client.run(tx, shutdown_rx));

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Disconnect(_)));
        assert_eq!(connections.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_default_options() {
        let options = StreamOptions::default();
        assert_eq!(options.staleness_timeout, None);
        assert_eq!(
            options.snapshot_settle_delay,
            Duration::from_millis(DEFAULT_SNAPSHOT_SETTLE_DELAY_MS)
        );
    }

    #[tokio::test]
    async fn test_heartbeats_keep_stream_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // three staleness windows covered only by heartbeats
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ws.send(WsMessage::Text(json!({"heartbeat": 1}).to_string()))
                    .await
                    .unwrap();
            }
            ws.send(WsMessage::Text(json!({"x": 1}).to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let options = StreamOptions {
            staleness_timeout: Some(Duration::from_millis(100)),
            snapshot_settle_delay: Duration::from_millis(0),
        };
        let adapter = TestAdapter::new(format!("ws://{}", addr));
        let client = StreamingClient::new(Arc::new(adapter), filters(), options).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(client.run(tx, shutdown_rx));

        match next_event(&mut rx).await {
            StreamEvent::Message { message, .. } => assert_eq!(message, json!({"x": 1})),
            other => panic!("Expected data frame, got {:?}", other),
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
