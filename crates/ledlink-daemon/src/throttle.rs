//! Rate limit for repeated open errors.

use std::time::{Duration, Instant};

/// What to do with one error.
#[derive(Debug, PartialEq, Eq)]
pub enum Report {
    /// First error of a run; log it.
    First,
    /// Log a summary of the errors held back since the last log.
    Repeated { count: u32, over: Duration },
    /// Stay quiet.
    Suppressed,
}

/// Logs the first error of a run, then at most one summary per interval.
pub struct ErrorThrottle {
    interval: Duration,
    last_log: Option<Instant>,
    suppressed: u32,
}

impl ErrorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_log: None,
            suppressed: 0,
        }
    }

    pub fn record(&mut self) -> Report {
        self.record_at(Instant::now())
    }

    pub fn record_at(&mut self, now: Instant) -> Report {
        let Some(last) = self.last_log else {
            self.last_log = Some(now);
            return Report::First;
        };

        self.suppressed += 1;
        let over = now.saturating_duration_since(last);
        if over < self.interval {
            return Report::Suppressed;
        }
        let count = std::mem::take(&mut self.suppressed);
        self.last_log = Some(now);
        Report::Repeated { count, over }
    }

    /// Ends the run; the next error is logged straight away.
    pub fn reset(&mut self) {
        self.last_log = None;
        self.suppressed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_logs() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(60));
        assert_eq!(throttle.record_at(Instant::now()), Report::First);
    }

    #[test]
    fn test_repeats_wait_for_interval() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(60));
        let start = Instant::now();
        assert_eq!(throttle.record_at(start), Report::First);
        for secs in 1..=30 {
            assert_eq!(
                throttle.record_at(start + Duration::from_secs(secs)),
                Report::Suppressed
            );
        }
        assert_eq!(
            throttle.record_at(start + Duration::from_secs(61)),
            Report::Repeated {
                count: 31,
                over: Duration::from_secs(61)
            }
        );
        assert_eq!(
            throttle.record_at(start + Duration::from_secs(62)),
            Report::Suppressed
        );
    }

    #[test]
    fn test_reset_starts_new_run() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(60));
        let start = Instant::now();
        throttle.record_at(start);
        throttle.record_at(start + Duration::from_secs(1));
        throttle.reset();
        assert_eq!(
            throttle.record_at(start + Duration::from_secs(2)),
            Report::First
        );
    }
}
