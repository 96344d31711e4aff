//! Monotonic time abstraction (`TimeBase`).
//!
//! The scheduler never reads a clock on its own; the host supplies a
//! [`Clock`] (or simply a raw [`Tick`] value per call to
//! [`crate::Scheduler::execute`]). All arithmetic on `Tick` values is
//! modular: a counter that wraps around after its type's maximum value
//! is handled correctly as long as any two ticks being compared are
//! within half the counter's range of each other, per spec.

/// A monotonic tick count in the configured resolution.
///
/// Milliseconds by default (`u32`, wraps after ~49.7 days); microseconds
/// (`u64`) when the `micros` feature is enabled.
#[cfg(not(feature = "micros"))]
pub type Tick = u32;
#[cfg(feature = "micros")]
pub type Tick = u64;

/// Signed counterpart of [`Tick`], wide enough to hold the difference
/// between any two tick values after modular wraparound.
#[cfg(not(feature = "micros"))]
pub type SignedTick = i32;
#[cfg(feature = "micros")]
pub type SignedTick = i64;

/// Interval reserved for "dispatch immediately" (`IMMEDIATE` in the spec).
pub const IMMEDIATE: Tick = 0;

/// Sentinel meaning "no timeout armed" (`NO_TIMEOUT` in the spec).
pub const NO_TIMEOUT: Tick = 0;

/// Computes `a - b` under modular (wraparound-tolerant) arithmetic.
///
/// This is the only primitive the scheduler uses to compare tick values;
/// every readiness and ordering check goes through it so that a wrapped
/// counter never needs special-casing at call sites.
#[inline]
pub fn wrapping_diff(a: Tick, b: Tick) -> SignedTick {
    a.wrapping_sub(b) as SignedTick
}

/// Returns whether `now` has reached or passed the scheduled moment `at`,
/// tolerating a single wraparound of the counter.
#[inline]
pub fn is_due(now: Tick, at: Tick) -> bool {
    wrapping_diff(now, at) >= 0
}

/// Host-provided monotonic clock.
///
/// Implementations must be wraparound-tolerant: once the tick counter
/// overflows its type it is expected to wrap rather than panic. This is
/// the only required host integration point besides `execute()` itself.
pub trait Clock {
    /// Returns the current tick count.
    fn now(&self) -> Tick;
}

impl<F> Clock for F
where
    F: Fn() -> Tick,
{
    fn now(&self) -> Tick {
        self()
    }
}

/// `std::time::Instant`-backed [`Clock`], for hosts that are not
/// embedded and just want a working monotonic source out of the box.
#[derive(Debug)]
pub struct SystemClock {
    epoch: std::time::Instant,
}

impl SystemClock {
    /// Creates a clock whose epoch is "now".
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Tick {
        let elapsed = self.epoch.elapsed();
        #[cfg(not(feature = "micros"))]
        {
            elapsed.as_millis() as Tick
        }
        #[cfg(feature = "micros")]
        {
            elapsed.as_micros() as Tick
        }
    }
}

/// Deterministic [`Clock`] for tests: advances only when told to.
///
/// Not gated behind `cfg(test)` because integration tests and
/// `proptest` properties in `tests/` need it from outside the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualClock {
    now: Tick,
}

impl ManualClock {
    /// Creates a clock starting at tick `0`.
    pub fn new() -> Self {
        Self { now: 0 }
    }

    /// Creates a clock starting at the given tick (useful for exercising
    /// wraparound close to the counter's maximum value).
    pub fn starting_at(now: Tick) -> Self {
        Self { now }
    }

    /// Advances the clock by `delta` ticks, wrapping on overflow.
    pub fn advance(&mut self, delta: Tick) {
        self.now = self.now.wrapping_add(delta);
    }

    /// Sets the clock to an absolute tick value.
    pub fn set(&mut self, now: Tick) {
        self.now = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_when_equal() {
        assert!(is_due(100, 100));
    }

    #[test]
    fn due_when_past() {
        assert!(is_due(150, 100));
    }

    #[test]
    fn not_due_when_future() {
        assert!(!is_due(50, 100));
    }

    #[test]
    fn tolerates_wraparound() {
        let at = Tick::MAX - 5;
        let now = at.wrapping_add(10);
        assert!(is_due(now, at));
        assert!(!is_due(at.wrapping_sub(1), at));
    }

    #[test]
    fn manual_clock_advances_and_wraps() {
        let mut clock = ManualClock::starting_at(Tick::MAX - 3);
        clock.advance(10);
        assert_eq!(clock.now(), 6);
    }
}
