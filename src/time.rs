//! # Timebase
//!
//! Timekeeping on top of a free-running, fixed-width hardware counter that
//! wraps from its maximum value back to zero.
//!
//! ## Wraparound
//!
//! The counter is narrow (24 bits for SysTick, as little as 8 bits on small
//! parts), so it wraps often. Times are compared with a signed half-range
//! test: a target less than half a period ahead of `now` is in the future,
//! a target less than half a period behind is in the past. This gives
//! correct answers across at most one wrap and bounds every delay to
//! `max_delay()` ticks, i.e. half the period minus one.
//!
//! ```text
//!   diff = target - now        (as i64, counter values masked to `bits`)
//!
//!   diff < -(range/2 - 1)  →  not past  (target wrapped ahead of now)
//!   diff >  (range/2 - 1)  →  past      (now wrapped past target)
//!   otherwise              →  past iff diff < 0
//! ```
//!
//! The half-period bound is a caller contract. `Timebase` doesn't enforce it
//! except where noted.

use core::fmt;
#[cfg(not(target_os = "none"))]
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Counter source
// ---------------------------------------------------------------------------

/// A free-running hardware counter.
///
/// `read` returns the raw counter value. Only the low `bits` bits (as given
/// to [`Timebase::new`]) are significant; the timebase masks the rest.
pub trait Clock: Sync {
    /// Reads the current counter value.
    fn read(&self) -> u32;
}

/// Simulated counter for hosted builds. Time only moves when told to.
#[cfg(not(target_os = "none"))]
#[derive(Debug, Default)]
pub struct SimClock {
    ticks: AtomicU32,
}

#[cfg(not(target_os = "none"))]
impl SimClock {
    /// Creates a clock reading zero.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU32::new(0),
        }
    }

    /// Sets the raw counter value.
    pub fn set(&self, ticks: u32) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// Advances the counter by `ticks`, wrapping at `u32::MAX`.
    pub fn advance(&self, ticks: u32) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }
}

#[cfg(not(target_os = "none"))]
impl Clock for SimClock {
    fn read(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tick rate
// ---------------------------------------------------------------------------

/// The real-time length of a tick, expressed as the counter's input clock
/// and prescaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    /// Input clock frequency in Hz.
    pub clock_hz: u32,
    /// Divider between the input clock and the counter.
    pub prescaler: u32,
}

impl TickRate {
    /// Creates a tick rate. Both values must be non-zero for the conversions
    /// to be meaningful; [`Timebase::new`] checks this.
    pub const fn new(clock_hz: u32, prescaler: u32) -> Self {
        Self { clock_hz, prescaler }
    }

    /// Converts microseconds to ticks, rounding to the nearest tick (ties
    /// away from zero) and saturating at `u32::MAX`.
    pub const fn ticks_from_micros(&self, us: u32) -> u32 {
        Self::round_ticks(us as u64 * self.clock_hz as u64, 1_000_000 * self.prescaler as u64)
    }

    /// Converts milliseconds to ticks, rounding like
    /// [`ticks_from_micros`](Self::ticks_from_micros).
    pub const fn ticks_from_millis(&self, ms: u32) -> u32 {
        Self::round_ticks(ms as u64 * self.clock_hz as u64, 1_000 * self.prescaler as u64)
    }

    const fn round_ticks(num: u64, den: u64) -> u32 {
        let ticks = num.saturating_add(den / 2) / den;
        if ticks > u32::MAX as u64 {
            u32::MAX
        } else {
            ticks as u32
        }
    }
}

// ---------------------------------------------------------------------------
// Time values
// ---------------------------------------------------------------------------

/// A point in time, as a value of the (masked) counter.
///
/// `TickTime`s are only meaningful relative to each other through a
/// [`Timebase`], which knows the counter's width.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TickTime(u32);

impl TickTime {
    /// Wraps a raw counter value. The value is masked when it is compared or
    /// offset through a `Timebase`.
    pub const fn from_raw(ticks: u32) -> Self {
        Self(ticks)
    }

    /// Returns the raw counter value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<TickTime> for u32 {
    fn from(t: TickTime) -> Self {
        t.0
    }
}

// ---------------------------------------------------------------------------
// Timebase
// ---------------------------------------------------------------------------

/// A wrapping counter plus the width and rate needed to interpret it.
pub struct Timebase {
    clock: &'static dyn Clock,
    bits: u32,
    rate: TickRate,
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timebase")
            .field("bits", &self.bits)
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

impl Timebase {
    /// Creates a timebase over `clock`, a counter `bits` wide that advances
    /// at `rate`.
    ///
    /// # Errors
    /// - `InvalidTimerWidth` unless `2 <= bits <= 32`.
    /// - `InvalidTickRate` if the clock frequency or prescaler is zero.
    pub fn new(clock: &'static dyn Clock, bits: u32, rate: TickRate) -> Result<Self> {
        if !(2..=32).contains(&bits) {
            return Err(KernelError::InvalidTimerWidth(bits));
        }
        if rate.clock_hz == 0 || rate.prescaler == 0 {
            return Err(KernelError::InvalidTickRate);
        }
        Ok(Self { clock, bits, rate })
    }

    /// Counter width in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Tick rate of the counter.
    pub fn rate(&self) -> TickRate {
        self.rate
    }

    /// Number of distinct counter values (the wrap period in ticks).
    pub fn period(&self) -> u64 {
        1u64 << self.bits
    }

    /// Longest delay, in ticks, whose wakeup can be told apart from a past
    /// time: half the period minus one.
    pub fn max_delay(&self) -> u32 {
        (self.period() / 2 - 1) as u32
    }

    #[inline]
    fn mask(&self) -> u32 {
        (self.period() - 1) as u32
    }

    /// Reads the counter.
    pub fn now(&self) -> TickTime {
        TickTime(self.clock.read() & self.mask())
    }

    /// Checks whether the clock has moved past `target`.
    ///
    /// The comparison is strict: at exactly `target` the answer is still
    /// `false`, so a polled wakeup lands one tick after the target.
    pub fn is_past(&self, target: TickTime) -> bool {
        self.is_past_at(self.now(), target)
    }

    /// Checks whether `target` is strictly behind `now`, correct
    /// across at most one wrap as long as the two are less than half a
    /// period apart.
    pub fn is_past_at(&self, now: TickTime, target: TickTime) -> bool {
        let half = i64::from(self.max_delay());
        let mask = self.mask();
        let diff = i64::from(target.0 & mask) - i64::from(now.0 & mask);

        if diff < -half {
            // Target wrapped around ahead of now
            false
        } else if diff > half {
            // Now wrapped around past target
            true
        } else {
            diff < 0
        }
    }

    /// Returns `from + ticks`, wrapped to the counter width.
    pub fn offset(&self, from: TickTime, ticks: u32) -> TickTime {
        TickTime(from.0.wrapping_add(ticks) & self.mask())
    }

    /// Returns the time `ticks` from now.
    ///
    /// `ticks` must not exceed [`max_delay`](Self::max_delay); this is only
    /// asserted in debug builds.
    pub fn deadline_after(&self, ticks: u32) -> TickTime {
        debug_assert!(
            ticks <= self.max_delay(),
            "delay of {} ticks exceeds half the timer period",
            ticks
        );
        self.offset(self.now(), ticks)
    }

    /// Forward distance from `earlier` to `later`, modulo the period.
    pub fn ticks_between(&self, earlier: TickTime, later: TickTime) -> u32 {
        later.0.wrapping_sub(earlier.0) & self.mask()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    const RATE: TickRate = TickRate::new(8_000_000, 1024);

    fn timebase(bits: u32) -> (&'static SimClock, Timebase) {
        let clock: &'static SimClock = Box::leak(Box::new(SimClock::new()));
        (clock, Timebase::new(clock, bits, RATE).unwrap())
    }

    fn t(raw: u32) -> TickTime {
        TickTime::from_raw(raw)
    }

    #[test]
    fn test_wrap_examples_8bit() {
        let (_, tb) = timebase(8);
        // Target is 16 ticks ahead after the wrap
        assert!(!tb.is_past_at(t(250), t(10)));
        // Target is 16 ticks behind, before the wrap
        assert!(tb.is_past_at(t(10), t(250)));
        // Reaching the target isn't enough, it has to be passed
        assert!(!tb.is_past_at(t(42), t(42)));
        assert!(!tb.is_past_at(t(42), t(43)));
        assert!(tb.is_past_at(t(43), t(42)));
        // Same, across the wrap
        assert!(!tb.is_past_at(t(0), t(0)));
        assert!(tb.is_past_at(t(0), t(255)));
    }

    /// Checks every (now, target) pair for a counter of `bits` width against
    /// the chronological answer, skipping the ambiguous half-period distance.
    fn check_exhaustive(bits: u32) {
        let (_, tb) = timebase(bits);
        let range = 1u32 << bits;
        let half = range / 2;
        for now in 0..range {
            for ahead in 0..range {
                if ahead == half {
                    continue;
                }
                let target = (now + ahead) % range;
                // `ahead` in 0..half means the target hasn't been passed;
                // anything above half is really `range - ahead` ticks behind.
                let expected = ahead > half;
                assert_eq!(
                    tb.is_past_at(t(now), t(target)),
                    expected,
                    "bits={} now={} target={}",
                    bits,
                    now,
                    target
                );
            }
        }
    }

    #[test]
    fn test_wrap_exhaustive_8bit() {
        check_exhaustive(8);
    }

    #[test]
    fn test_wrap_exhaustive_small_ranges() {
        for bits in 2..=6 {
            check_exhaustive(bits);
        }
    }

    fn wrap_property(bits: u32, now: u32, dist: u32, behind: bool) -> bool {
        let (_, tb) = timebase(bits);
        let dist = dist % (tb.max_delay() + 1);
        let target = if behind {
            t(now.wrapping_sub(dist))
        } else {
            tb.offset(t(now), dist)
        };
        tb.is_past_at(t(now), target) == (behind && dist != 0)
    }

    #[quickcheck]
    fn qc_wrap_16bit(now: u32, dist: u32, behind: bool) -> bool {
        wrap_property(16, now, dist, behind)
    }

    #[quickcheck]
    fn qc_wrap_24bit(now: u32, dist: u32, behind: bool) -> bool {
        wrap_property(24, now, dist, behind)
    }

    #[quickcheck]
    fn qc_wrap_32bit(now: u32, dist: u32, behind: bool) -> bool {
        wrap_property(32, now, dist, behind)
    }

    #[test]
    fn test_now_masks_counter() {
        let (clock, tb) = timebase(8);
        clock.set(300);
        assert_eq!(tb.now(), t(44));
        clock.advance(u32::MAX);
        assert_eq!(tb.now(), t(43));
    }

    #[test]
    fn test_deadline_wraps() {
        let (clock, tb) = timebase(8);
        clock.set(250);
        let deadline = tb.deadline_after(10);
        assert_eq!(deadline, t(4));
        assert!(!tb.is_past(deadline));
        clock.advance(10);
        assert!(!tb.is_past(deadline));
        clock.advance(1);
        assert!(tb.is_past(deadline));
        assert_eq!(tb.ticks_between(t(250), deadline), 10);
    }

    #[test]
    fn test_max_delay_and_period() {
        let (_, tb) = timebase(8);
        assert_eq!(tb.period(), 256);
        assert_eq!(tb.max_delay(), 127);

        let (_, tb) = timebase(32);
        assert_eq!(tb.period(), 1 << 32);
        assert_eq!(tb.max_delay(), i32::MAX as u32);
    }

    #[test]
    fn test_invalid_timebase() {
        let clock: &'static SimClock = Box::leak(Box::new(SimClock::new()));
        assert_eq!(
            Timebase::new(clock, 1, RATE).unwrap_err(),
            KernelError::InvalidTimerWidth(1)
        );
        assert_eq!(
            Timebase::new(clock, 33, RATE).unwrap_err(),
            KernelError::InvalidTimerWidth(33)
        );
        assert_eq!(
            Timebase::new(clock, 8, TickRate::new(8_000_000, 0)).unwrap_err(),
            KernelError::InvalidTickRate
        );
    }

    #[test]
    fn test_tick_conversion_rounds_to_nearest() {
        // 8 MHz / 1024: one tick is exactly 128 µs
        assert_eq!(RATE.ticks_from_micros(128), 1);
        assert_eq!(RATE.ticks_from_micros(63), 0);
        // Exactly half a tick rounds away from zero
        assert_eq!(RATE.ticks_from_micros(64), 1);
        assert_eq!(RATE.ticks_from_micros(192), 2);
        // 7.8125 ticks
        assert_eq!(RATE.ticks_from_millis(1), 8);
        // 156.25 ticks
        assert_eq!(RATE.ticks_from_millis(20), 156);
        assert_eq!(RATE.ticks_from_millis(0), 0);
    }

    #[test]
    fn test_tick_conversion_saturates() {
        let fast = TickRate::new(u32::MAX, 1);
        assert_eq!(fast.ticks_from_millis(u32::MAX), u32::MAX);
    }
}
