//! Reconnect delay policy.

use std::time::Duration;

/// Capped exponential backoff for broker reconnects.
///
/// Attempt 0 waits `base_delay`, each further attempt doubles, and every
/// delay is capped at `max_delay`. The attempt counter is owned by the
/// caller and reset once a connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before the given attempt (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Past 2^16 the doubling is far beyond any sane cap anyway.
        let factor = 1u128 << attempt.min(16);
        let millis = self.base_delay.as_millis().saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_delay.as_millis()) as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
