//! Fixed-interval frame pacing.

use web_time::Duration;

/// Turns elapsed wall time into a number of logical frame advances.
///
/// Elapsed time accumulates across calls to [`FrameClock::tick`]; each full
/// interval in the accumulator is one advance. A single call never counts
/// more than `max_tick_elapsed`, so a host that was suspended for seconds
/// does not try to catch up all at once.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::FrameClock;
/// use web_time::Duration;
///
/// let mut clock = FrameClock::new(Duration::from_millis(10), Duration::from_millis(250));
/// clock.start();
/// assert_eq!(clock.tick(Duration::from_millis(25)), 2);
/// assert_eq!(clock.tick(Duration::from_millis(5)), 1);
/// ```
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    max_tick_elapsed: Duration,
    accumulator: Duration,
    running: bool,
}

impl FrameClock {
    /// Creates a stopped clock.
    #[must_use]
    pub fn new(interval: Duration, max_tick_elapsed: Duration) -> Self {
        Self {
            interval,
            max_tick_elapsed,
            accumulator: Duration::ZERO,
            running: false,
        }
    }

    /// Starts the clock with an empty accumulator.
    pub fn start(&mut self) {
        self.accumulator = Duration::ZERO;
        self.running = true;
    }

    /// Stops the clock. A stopped clock produces no advances.
    pub fn stop(&mut self) {
        self.running = false;
        self.accumulator = Duration::ZERO;
    }

    /// Returns `true` while the clock is started.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// The nominal frame interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Time accumulated towards the next advance.
    #[must_use]
    pub const fn accumulated(&self) -> Duration {
        self.accumulator
    }

    /// Adds `elapsed` and returns how many advances are due.
    pub fn tick(&mut self, elapsed: Duration) -> u32 {
        if !self.running || self.interval.is_zero() {
            return 0;
        }
        self.accumulator += elapsed.min(self.max_tick_elapsed);
        let mut advances = 0;
        while self.accumulator >= self.interval {
            self.accumulator -= self.interval;
            advances += 1;
        }
        advances
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn clock() -> FrameClock {
        FrameClock::new(Duration::from_millis(16), Duration::from_millis(250))
    }

    #[test]
    fn stopped_clock_never_advances() {
        let mut clock = clock();
        assert_eq!(clock.tick(Duration::from_secs(1)), 0);
        assert_eq!(clock.accumulated(), Duration::ZERO);
    }

    #[test]
    fn remainder_carries_over() {
        let mut clock = clock();
        clock.start();
        assert_eq!(clock.tick(Duration::from_millis(10)), 0);
        assert_eq!(clock.tick(Duration::from_millis(10)), 1);
        assert_eq!(clock.accumulated(), Duration::from_millis(4));
    }

    #[test]
    fn long_pause_is_clamped() {
        let mut clock = clock();
        clock.start();
        // 250 ms / 16 ms = 15 advances, not 625.
        assert_eq!(clock.tick(Duration::from_secs(10)), 15);
    }

    #[test]
    fn restart_zeroes_accumulator() {
        let mut clock = clock();
        clock.start();
        clock.tick(Duration::from_millis(15));
        clock.start();
        assert_eq!(clock.tick(Duration::from_millis(15)), 0);
    }

    #[test]
    fn zero_interval_is_inert() {
        let mut clock = FrameClock::new(Duration::ZERO, Duration::from_millis(250));
        clock.start();
        assert_eq!(clock.tick(Duration::from_millis(100)), 0);
    }
}
