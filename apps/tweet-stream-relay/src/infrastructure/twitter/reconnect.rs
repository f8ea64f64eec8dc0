//! Reconnection Policy
//!
//! Exponential backoff with jitter for the filtered-stream connection, plus
//! the provider's rate-limit reset hint for HTTP 429 answers.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for ReconnectConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use tweet_stream_relay::infrastructure::twitter::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// let first = policy.next_delay();
/// assert!(first.is_some());
///
/// // Stream came back up
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
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

    /// Get the next delay duration, applying exponential backoff with jitter.
    ///
    /// Returns `None` once max attempts have been used up.
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

    /// Delay before retrying after the provider rate-limited the stream.
    ///
    /// Uses the `x-rate-limit-reset` epoch when present, otherwise the
    /// regular backoff. Counts as one attempt either way.
    #[must_use]
    pub fn next_rate_limited_delay(
        &mut self,
        reset_epoch_secs: Option<i64>,
        now_epoch_secs: i64,
    ) -> Option<Duration> {
        let backoff = self.next_delay()?;
        let Some(reset) = reset_epoch_secs else {
            return Some(backoff);
        };
        let wait = u64::try_from(reset.saturating_sub(now_epoch_secs)).unwrap_or(0);
        Some(
            Duration::from_secs(wait)
                .max(backoff)
                .min(self.config.max_delay),
        )
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
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

    fn no_jitter(initial_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn config_follows_stream_settings() {
        let settings = StreamSettings {
            reconnect_delay_initial: Duration::from_millis(250),
            reconnect_delay_max: Duration::from_secs(8),
            reconnect_delay_multiplier: 3.0,
            max_reconnect_attempts: 4,
            ..StreamSettings::default()
        };
        let config = ReconnectConfig::from(&settings);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(8));
        assert!((config.multiplier - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn delays_double_until_capped() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 500, 0));
        let delays: Vec<u128> = (0..5)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn attempts_run_out() {
        let mut policy = ReconnectPolicy::new(no_jitter(10, 100, 2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 2);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 10_000, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..no_jitter(1000, 10_000, 0)
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn rate_limit_reset_wins_over_short_backoff() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 60_000, 0));
        let delay = policy.next_rate_limited_delay(Some(1_030), 1_000).unwrap();
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn rate_limit_reset_is_capped() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 5_000, 0));
        let delay = policy.next_rate_limited_delay(Some(10_000), 1_000).unwrap();
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn rate_limit_without_reset_uses_backoff() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 5_000, 0));
        let delay = policy.next_rate_limited_delay(None, 1_000).unwrap();
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn rate_limit_reset_in_the_past_uses_backoff() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 5_000, 0));
        let delay = policy.next_rate_limited_delay(Some(900), 1_000).unwrap();
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn rate_limit_respects_max_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 5_000, 1));
        assert!(policy.next_rate_limited_delay(Some(1_010), 1_000).is_some());
        assert!(policy.next_rate_limited_delay(Some(1_010), 1_000).is_none());
    }
}
