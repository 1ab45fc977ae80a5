// ErrorThrottler: exponential backoff between failed queue polls.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);

const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Doubles the wait after every consecutive poll error, between `min` and `max`.
/// A successful poll resets it.
#[derive(Debug, Clone)]
pub struct ErrorThrottler {
    min: Duration,
    max: Duration,
    current: Duration,
    consecutive_errors: u32,
}

impl ErrorThrottler {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
            consecutive_errors: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.min;
        self.consecutive_errors = 0;
    }

    /// Delay the next `increment_and_wait` will sleep for.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Sleep for the current delay, then double it.
    ///
    /// Returns `false` if `cancel` fired before the delay elapsed.
    pub async fn increment_and_wait(&mut self, cancel: CancellationToken) -> bool {
        let delay = self.current;
        self.increment();

        tracing::warn!(
            "Queue error #{}: waiting {:.1}s before polling again",
            self.consecutive_errors,
            delay.as_secs_f64()
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }

    fn increment(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
    }
}

impl Default for ErrorThrottler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}
