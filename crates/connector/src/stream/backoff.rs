use std::time::Duration;

/// Rate-limited reconnects wait 16x longer
const RATE_LIMIT_EXPONENT_OFFSET: u32 = 4;
const MAX_EXPONENT: u32 = 16;

/// Exponential reconnect delay without jitter.
///
/// `2^retries` seconds, or `2^(retries + 4)` after a rate limit.
#[derive(Debug, Default, Clone)]
pub struct Backoff {
    retries: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before the next attempt; counts the failed cycle
    pub fn on_failure(&mut self, rate_limited: bool) -> Duration {
        let offset = if rate_limited {
            RATE_LIMIT_EXPONENT_OFFSET
        } else {
            0
        };
        let exponent = self.retries.saturating_add(offset).min(MAX_EXPONENT);
        self.retries = self.retries.saturating_add(1);
        Duration::from_secs(1u64 << exponent)
    }

    pub fn on_success(&mut self) {
        self.retries = 0;
    }
}
