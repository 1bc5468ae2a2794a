//! Reconnect delay schedule.

use std::time::Duration;

const FIRST_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Stateful reconnect schedule: an immediate first retry, then doubling
/// delays capped at ten seconds.
///
/// `next()` yields the delay to apply *now* and advances the schedule;
/// `reset()` rewinds to the immediate retry after a successful connection.
///
/// # Example
///
/// ```rust
/// use capstan_core::backoff::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new();
/// assert_eq!(backoff.next(), Duration::ZERO);
/// assert_eq!(backoff.next(), Duration::from_millis(100));
/// assert_eq!(backoff.next(), Duration::from_millis(200));
///
/// backoff.reset();
/// assert_eq!(backoff.next(), Duration::ZERO);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Rewind to an immediate retry.
    pub fn reset(&mut self) {
        self.delay = Duration::ZERO;
    }

    /// The delay to apply for the next attempt; advances the schedule.
    pub fn next(&mut self) -> Duration {
        let current = self.delay;
        self.delay = if current.is_zero() {
            FIRST_DELAY
        } else {
            (current * 2).min(MAX_DELAY)
        };
        current
    }

    /// The delay `next()` would return, without advancing.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        let mut backoff = Backoff::new();
        let observed: Vec<u64> = (0..10).map(|_| backoff.next().as_millis() as u64).collect();
        assert_eq!(
            observed,
            vec![0, 100, 200, 400, 800, 1600, 3200, 6400, 10_000, 10_000]
        );
    }

    #[test]
    fn test_stays_capped() {
        let mut backoff = Backoff::new();
        for _ in 0..20 {
            backoff.next();
        }
        assert_eq!(backoff.next(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new();
        backoff.next();
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.next(), Duration::ZERO);
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }
}
