//! Reconnect backoff

use std::time::Duration;

/// Growing delay between failed connection attempts
///
/// Each call to [`Backoff::next_delay`] returns the current delay and then
/// grows it by the multiplier, rounded to whole milliseconds and capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            current: initial.min(max),
        }
    }

    /// Delay the next failure will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for this failure and grow it for the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = (delay.as_millis() as f64 * self.multiplier).round() as u64;
        self.current = Duration::from_millis(grown).min(self.max);
        delay
    }

    /// Back to the initial delay, after a successful probe
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(600), Duration::from_millis(12_000), 1.1)
    }

    #[test]
    fn test_growth_sequence() {
        let mut backoff = backoff();
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![600, 660, 726, 799, 879]);
    }

    #[test]
    fn test_capped() {
        let mut backoff = backoff();
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(12_000));
        assert_eq!(backoff.current(), Duration::from_millis(12_000));
    }

    #[test]
    fn test_reset() {
        let mut backoff = backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(600));
    }
}
