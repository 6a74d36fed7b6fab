use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Live view of one streaming client, shared with the health server
#[derive(Debug, Default)]
pub struct StreamStatus {
    connected: AtomicBool,
    /// Ended connection cycles
    disconnects: AtomicU64,
    /// Epoch millis of the last frame, 0 = none yet
    last_frame_ms: AtomicI64,
}

impl StreamStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Milliseconds since the last frame, `None` before the first one
    pub fn last_frame_age_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        match self.last_frame_ms.load(Ordering::SeqCst) {
            0 => None,
            last => Some((now.timestamp_millis() - last).max(0) as u64),
        }
    }

    pub(crate) fn set_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_frame(&self, at: DateTime<Utc>) {
        self.last_frame_ms.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}
