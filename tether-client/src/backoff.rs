//! Reconnection delay policies
//!
//! When the channel loses (or fails to establish) its connection it asks a
//! [`ReconnectionStrategy`] how long to wait before the next attempt. The
//! attempt number passed in is the count of consecutive failed attempts
//! since the channel was last Open, so the first retry after a drop is
//! attempt 0.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `min(base * decay^attempt, max)`, the default
//! - **NoReconnect**: give up on the first loss
//!
//! # Examples
//!
//! ```rust
//! use tether_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::default();
//! assert_eq!(backoff.next_delay(0), Some(Duration::from_millis(1000)));
//! assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(1500)));
//! assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(2250)));
//! ```

use std::time::Duration;

/// Default delay before the first retry
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_millis(1000);
/// Default growth factor between consecutive retries
pub const DEFAULT_DECAY: f64 = 1.5;
/// Default upper bound on any single delay
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(10_000);

/// Decides how long to wait between reconnection attempts
///
/// The channel owns its strategy exclusively, so implementations may keep
/// state between calls.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before retrying after `attempt` consecutive failures
    ///
    /// Returning `None` gives up: the channel moves to Closed and reports
    /// `Error::ReconnectExhausted`.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called each time the channel reaches Open
    fn reset(&mut self) {}
}

/// Exponential backoff with a ceiling and optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_interval: Duration,
    decay: f64,
    max_interval: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Create a policy retrying forever without jitter
    ///
    /// A `decay` below 1.0 is clamped to 1.0 so delays never shrink.
    pub fn new(base_interval: Duration, decay: f64, max_interval: Duration) -> Self {
        Self {
            base_interval,
            decay: if decay.is_finite() { decay.max(1.0) } else { 1.0 },
            max_interval,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Give up once `max_attempts` consecutive attempts have failed
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add a random 0-25% on top of each delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// The delay for `attempt` before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.decay.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_interval.as_millis() as f64 * factor;
        let cap = self.max_interval.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_interval
        } else {
            Duration::from_millis(millis.round() as u64)
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_INTERVAL, DEFAULT_DECAY, DEFAULT_MAX_INTERVAL)
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let delay = self.base_delay(attempt);
        if !self.jitter {
            return Some(delay);
        }

        use rand::Rng;
        let ms = delay.as_millis() as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=(ms / 4));
        Some(Duration::from_millis(ms + jitter_ms))
    }
}

/// Never reconnect; the first loss closes the channel
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut strategy = ExponentialBackoff::default();
        let delays: Vec<_> = (0..3).map(|a| strategy.next_delay(a).unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250),
            ]
        );
    }

    #[test]
    fn test_delay_capped_at_max_interval() {
        let mut strategy = ExponentialBackoff::default();
        // 1000 * 1.5^6 = 11390.625 > 10000
        assert_eq!(strategy.next_delay(6), Some(Duration::from_millis(10_000)));
        assert_eq!(strategy.next_delay(500), Some(Duration::from_millis(10_000)));
        assert_eq!(strategy.next_delay(u32::MAX), Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn test_custom_parameters() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), 2.0, Duration::from_millis(1000));
        assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next_delay(3), Some(Duration::from_millis(800)));
        assert_eq!(strategy.next_delay(4), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_decay_below_one_is_clamped() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(500), 0.5, Duration::from_secs(5));
        assert_eq!(strategy.next_delay(4), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_max_attempts() {
        let mut strategy = ExponentialBackoff::default().with_max_attempts(2);
        assert!(strategy.next_delay(0).is_some());
        assert!(strategy.next_delay(1).is_some());
        assert!(strategy.next_delay(2).is_none());
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let mut strategy = ExponentialBackoff::default().with_jitter();
        for _ in 0..50 {
            let delay = strategy.next_delay(1).unwrap();
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay <= Duration::from_millis(1875));
        }
    }

    #[test]
    fn test_no_reconnect() {
        let mut strategy = NoReconnect;
        assert!(strategy.next_delay(0).is_none());
    }
}
