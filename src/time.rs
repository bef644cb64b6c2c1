//! Clocks and timeout helpers.
//!
//! Everything time-related goes through `embedded_time`, so the core can run
//! against a hardware timer as easily as against `std::time::Instant`.

use embedded_time::duration::Milliseconds;
use embedded_time::Clock;

use crate::types::Timestamp;

#[cfg(feature = "std")]
pub use std_clock::StdClock;

pub use manual_clock::ManualClock;

/// Returns true if more than `timeout` has passed between `then` and `now`.
///
/// Uses `Instant` ordering, which compares wrapping tick differences, so a
/// wrapped tick counter doesn't keep stale state alive.
pub fn timestamp_expired<C>(timeout: Milliseconds<u32>, now: Timestamp<C>, then: Timestamp<C>) -> bool
where
    C: Clock,
    C::T: TryFrom<u32>,
{
    match then.checked_add(timeout) {
        Some(deadline) => now > deadline,
        // Timeout doesn't fit in half the clock range, nothing can expire.
        None => false,
    }
}

mod manual_clock {
    use embedded_time::{clock, rate::Fraction, Clock, Instant};

    /// Millisecond clock that only moves when told to.
    ///
    /// Used by the tests, and useful for replaying captured bus logs where
    /// timestamps come from the capture rather than the host.
    #[derive(Clone, Debug, Default)]
    pub struct ManualClock {
        ticks: u32,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self { ticks: 0 }
        }

        pub fn advance(&mut self, ms: u32) {
            self.ticks = self.ticks.wrapping_add(ms);
        }

        pub fn set(&mut self, ms: u32) {
            self.ticks = ms;
        }

        /// Instant at an arbitrary millisecond value, without touching the clock.
        pub fn at(ms: u32) -> Instant<Self> {
            Instant::new(ms)
        }

        pub fn now(&self) -> Instant<Self> {
            Instant::new(self.ticks)
        }
    }

    impl Clock for ManualClock {
        type T = u32;

        const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

        fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
            Ok(Instant::new(self.ticks))
        }
    }
}

#[cfg(feature = "std")]
mod std_clock {
    use embedded_time::{clock, rate::Fraction, Clock, Instant};

    /// Microsecond clock backed by `std::time::Instant`.
    #[derive(Clone, Debug)]
    pub struct StdClock {
        start: std::time::Instant,
    }

    impl StdClock {
        pub fn new() -> Self {
            Self {
                start: std::time::Instant::now(),
            }
        }
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for StdClock {
        type T = u64;

        const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

        fn try_now(&self) -> Result<Instant<Self>, clock::Error> {
            let elapsed = self.start.elapsed().as_micros() as u64;
            Ok(Instant::new(elapsed))
        }
    }
}
