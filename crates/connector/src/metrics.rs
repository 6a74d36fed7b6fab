//! Prometheus metrics for the streaming pipeline
//!
//! Per-exchange counters for raw frames, heartbeats, reconnects and derived records.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

const LABEL_EXCHANGE: &str = "exchange";
const LABEL_MESSAGE_TYPE: &str = "message_type";

/// Normalized messages written per exchange and message type
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_messages_total",
        "Total normalized messages produced per exchange and type",
        &[LABEL_EXCHANGE, LABEL_MESSAGE_TYPE]
    )
    .expect("Failed to register messages_total metric")
});

/// Raw frames forwarded by the streaming client
static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_frames_total",
        "Total raw frames forwarded by the streaming client",
        &[LABEL_EXCHANGE]
    )
    .expect("Failed to register frames_total metric")
});

static HEARTBEATS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_heartbeats_total",
        "Total heartbeat frames received",
        &[LABEL_EXCHANGE]
    )
    .expect("Failed to register heartbeats_total metric")
});

static RECONNECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_reconnects_total",
        "Total connection cycles that ended and were retried",
        &[LABEL_EXCHANGE]
    )
    .expect("Failed to register reconnects_total metric")
});

/// 1 = connected, 0 = disconnected
static CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdstream_websocket_connected",
        "WebSocket connection status (1=connected, 0=disconnected)",
        &[LABEL_EXCHANGE]
    )
    .expect("Failed to register websocket_connected metric")
});

static SNAPSHOTS_FETCHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_manual_snapshots_total",
        "Total manual book snapshots fetched over REST",
        &[LABEL_EXCHANGE]
    )
    .expect("Failed to register manual_snapshots_total metric")
});

/// Metrics handle bound to one exchange
#[derive(Clone)]
pub struct StreamMetrics {
    exchange: String,
}

impl StreamMetrics {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
        }
    }

    pub fn inc_message(&self, message_type: &str) {
        MESSAGES_TOTAL
            .with_label_values(&[&self.exchange, message_type])
            .inc();
    }

    pub fn inc_frame(&self) {
        FRAMES_TOTAL.with_label_values(&[&self.exchange]).inc();
    }

    pub fn inc_heartbeat(&self) {
        HEARTBEATS_TOTAL.with_label_values(&[&self.exchange]).inc();
    }

    pub fn inc_reconnect(&self) {
        RECONNECTS_TOTAL.with_label_values(&[&self.exchange]).inc();
    }

    pub fn inc_snapshot_fetched(&self) {
        SNAPSHOTS_FETCHED_TOTAL
            .with_label_values(&[&self.exchange])
            .inc();
    }

    pub fn snapshots_fetched(&self) -> u64 {
        SNAPSHOTS_FETCHED_TOTAL
            .with_label_values(&[&self.exchange])
            .get()
    }

    pub fn set_connected(&self) {
        CONNECTED.with_label_values(&[&self.exchange]).set(1);
    }

    pub fn set_disconnected(&self) {
        CONNECTED.with_label_values(&[&self.exchange]).set(0);
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_metrics() {
        let metrics = StreamMetrics::new("metrics-test");
        metrics.inc_message("trade");
        metrics.inc_frame();
        metrics.inc_heartbeat();
        metrics.inc_reconnect();
        metrics.inc_snapshot_fetched();
        metrics.set_connected();
        metrics.set_disconnected();

        let output = encode_metrics().unwrap();
        assert!(output.contains("mdstream_messages_total"));
        assert!(output.contains("exchange=\"metrics-test\""));
    }
}
