//! Reconnection Policy
//!
//! Delay schedule applied by the WebSocket transport between connection
//! attempts. The default is a fixed delay with a bounded number of
//! attempts; a multiplier above 1.0 turns it into exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = fixed delay).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Retries before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectConfig {
    /// Fixed-delay configuration from the client settings.
    #[must_use]
    pub const fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay,
            max_delay: settings.delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: settings.max_attempts,
        }
    }

    /// Switch to exponential backoff capped at `max_delay`.
    #[must_use]
    pub const fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    /// Randomize each delay by ±`jitter_factor`.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

/// Reconnection schedule state for one transport session.
///
/// # Example
///
/// ```rust
/// use price_stream::infrastructure::config::ReconnectSettings;
/// use price_stream::infrastructure::websocket::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let settings = ReconnectSettings { max_attempts: 2, delay: Duration::from_millis(3000) };
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::from_settings(&settings));
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(3000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(3000)));
/// assert_eq!(policy.next_delay(), None);
///
/// // A successful connection starts the budget over
/// policy.reset();
/// assert!(policy.should_retry());
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Retries consumed since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + jitter).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_attempts: u32, delay_ms: u64) -> ReconnectConfig {
        ReconnectConfig::from_settings(&ReconnectSettings {
            max_attempts,
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn default_is_ten_attempts_three_seconds_apart() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(3000));
        assert_eq!(config.max_attempts, 10);
        assert!((config.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fixed_delay_stops_after_budget() {
        let mut policy = ReconnectPolicy::new(fixed(10, 3000));

        for attempt in 1..=10 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(3000)));
            assert_eq!(policy.attempt_count(), attempt);
        }
        assert_eq!(policy.next_delay(), None);
        assert!(!policy.should_retry());
    }

    #[test]
    fn backoff_is_capped() {
        let config = fixed(0, 100).with_backoff(2.0, Duration::from_millis(350));
        let mut policy = ReconnectPolicy::new(config);

        let delays: Vec<_> = (0..4).filter_map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn reset_restores_budget_and_delay() {
        let mut policy = ReconnectPolicy::new(fixed(2, 100).with_backoff(2.0, Duration::from_secs(1)));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert!(!policy.should_retry());

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(fixed(0, 10));
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(fixed(0, 1000).with_jitter(0.1));
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }
}
