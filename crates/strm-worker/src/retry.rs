//! Failure tracking with exponential backoff for background loops.

use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for a loop that keeps retrying the same operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay after the first failure (doubles each further failure).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay after `failures` consecutive failures. Zero when there are none.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Suppresses log spam after repeated failures and yields the backoff to
/// wait before the next try.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
    backoff: Backoff,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            max_logged_failures,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    /// How long to wait before the next try.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay(self.consecutive_failures)
    }
}
