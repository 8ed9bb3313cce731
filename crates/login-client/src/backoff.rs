//! Capped exponential backoff cursor.

use std::time::Duration;

/// Capped exponential delay cursor.
///
/// Pure state, no timers: the owner asks for [`Backoff::next_delay`] when it
/// schedules a retry. The value handed out is the delay *before* growth, so
/// the first retry after a failure waits exactly `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Create a cursor starting at `base`. `multiplier` is expected to be > 1.
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            current: base,
            max,
            multiplier,
        }
    }

    /// Restore the working delay to `base`.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// The delay the next call to [`Backoff::next_delay`] will return.
    pub fn peek(&self) -> Duration {
        self.current.min(self.max)
    }

    /// Return the current delay, then grow the working delay for the following attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        let grown = self.current.as_secs_f64() * self.multiplier;
        self.current = if grown.is_finite() && grown < self.max.as_secs_f64() {
            Duration::from_secs_f64(grown)
        } else {
            self.max
        };
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_first_delay_is_base() {
        let mut backoff = Backoff::new(ms(1000), ms(30_000), 1.2);
        assert_eq!(backoff.next_delay(), ms(1000));
    }

    #[test]
    fn test_delays_grow_geometrically() {
        let mut backoff = Backoff::new(ms(1000), ms(30_000), 2.0);
        assert_eq!(backoff.next_delay(), ms(1000));
        assert_eq!(backoff.next_delay(), ms(2000));
        assert_eq!(backoff.next_delay(), ms(4000));
        assert_eq!(backoff.next_delay(), ms(8000));
    }

    #[test]
    fn test_delay_never_exceeds_max() {
        let mut backoff = Backoff::new(ms(1000), ms(5000), 2.0);
        let delays: Vec<Duration> = (0..50).map(|_| backoff.next_delay()).collect();

        assert_eq!(&delays[..4], &[ms(1000), ms(2000), ms(4000), ms(5000)]);
        assert!(delays.iter().all(|d| *d <= ms(5000)));
        assert_eq!(*delays.last().unwrap(), ms(5000));
    }

    #[test]
    fn test_fractional_multiplier_sequence() {
        let mut backoff = Backoff::new(ms(1000), ms(30_000), 1.5);
        assert_eq!(backoff.next_delay(), ms(1000));
        assert_eq!(backoff.next_delay(), ms(1500));
        assert_eq!(backoff.next_delay(), ms(2250));
    }

    #[test]
    fn test_reset_restores_base() {
        let mut backoff = Backoff::new(ms(1000), ms(30_000), 2.0);
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.peek(), ms(30_000));

        backoff.reset();
        assert_eq!(backoff.next_delay(), ms(1000));
        assert_eq!(backoff.next_delay(), ms(2000));
    }

    #[test]
    fn test_base_above_max_is_capped() {
        let mut backoff = Backoff::new(ms(10_000), ms(3000), 2.0);
        assert_eq!(backoff.next_delay(), ms(3000));
        assert_eq!(backoff.next_delay(), ms(3000));
    }

    #[test]
    fn test_independent_cursors_do_not_share_state() {
        let mut transport = Backoff::new(ms(1000), ms(30_000), 2.0);
        let mut http = transport.clone();

        transport.next_delay();
        transport.next_delay();

        assert_eq!(http.next_delay(), ms(1000));
        assert_eq!(transport.next_delay(), ms(4000));
    }
}
