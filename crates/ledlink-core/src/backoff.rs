//! Reconnection backoff.
//!
//! Delays grow geometrically from `initial` up to `max` so a vanished
//! device is not hammered with open attempts.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_ms);
        let max = Duration::from_millis(config.max_ms).max(initial);
        Self {
            initial,
            max,
            multiplier: config.multiplier.max(1.0),
            current: initial,
            attempts: 0,
        }
    }

    /// Returns the delay before the next attempt and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts += 1;
        let next = self.current.as_secs_f64() * self.multiplier;
        // Overflow or NaN saturates at the cap
        self.current = Duration::try_from_secs_f64(next).map_or(self.max, |d| d.min(self.max));
        delay
    }

    /// Starts the sequence over after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000, 8000]);
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_cap_below_initial() {
        let mut backoff = Backoff::new(&BackoffConfig {
            initial_ms: 1000,
            max_ms: 10,
            multiplier: 3.0,
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_multiplier_saturates() {
        let config: BackoffConfig = toml::from_str("multiplier = 1e300").unwrap();
        let mut backoff = Backoff::new(&config);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_huge_initial_delay_saturates() {
        let mut backoff = Backoff::new(&BackoffConfig {
            initial_ms: u64::MAX,
            max_ms: u64::MAX,
            multiplier: 2.0,
        });
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(u64::MAX));
    }
}
