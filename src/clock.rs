// src/clock.rs

//! # Clock Module
//!
//! Time capabilities consumed by the flight core. The board supplies a
//! monotonic microsecond clock and a free-running CPU cycle counter. Both
//! wrap, so every comparison goes through the wrap-safe helpers below rather
//! than plain subtraction.
//!
//! The module also holds the two pieces of timing plumbing that differ
//! between a real target and a test harness:
//!
//! - [`SpinWait`] is the strategy used to burn the residual cycles before a
//!   control deadline. [`BusyWait`] polls the counter with a bounded number of
//!   iterations; [`JumpToTarget`] moves a [`VirtualClock`] straight to the
//!   deadline.
//! - [`SampleSignal`] is the single-writer/single-reader cell that carries the
//!   IMU "data ready" notification out of an interrupt handler.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

/// Monotonic time source supplied by the board.
pub trait Clock {
    /// Microseconds since power-on. Wraps at `u32::MAX`.
    fn micros(&self) -> u32;

    /// Free-running CPU cycle counter. Wraps at `u32::MAX`.
    fn cycles(&self) -> u32;

    /// Cycle counter frequency in hertz.
    fn cycles_per_second(&self) -> u32;

    /// Milliseconds since power-on, derived from [`Clock::micros`].
    fn millis(&self) -> u32 {
        self.micros() / 1000
    }
}

/// Wrap-safe signed difference `a - b` for microsecond timestamps.
///
/// Positive when `a` is later than `b`, valid while the two are less than
/// half the counter range apart.
#[inline]
pub fn cmp_time_us(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Wrap-safe signed difference `a - b` for millisecond timestamps.
#[inline]
pub fn cmp_time_ms(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Wrap-safe signed difference `a - b` for cycle counts.
#[inline]
pub fn cmp_cycles(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Converts microseconds to cycles for a counter running at `cycles_per_second`.
#[inline]
pub fn micros_to_cycles(micros: u32, cycles_per_second: u32) -> u32 {
    ((micros as u64 * cycles_per_second as u64) / 1_000_000) as u32
}

/// Strategy for waiting out the cycles that remain before a control deadline.
pub trait SpinWait<C: Clock> {
    /// Waits until the cycle counter reaches `target_cycles` and returns the
    /// counter value observed on exit.
    ///
    /// Implementations must return even if the target is never observed; the
    /// caller runs the control step immediately afterwards either way.
    fn spin_until(&mut self, clock: &C, target_cycles: u32) -> u32;
}

/// Busy-polls the cycle counter.
///
/// The loop is bounded by `max_spins` counter reads. Scheduling never asks
/// for more than one control period of spin, so a bound of one period worth
/// of reads is always sufficient on real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyWait {
    /// Maximum number of counter reads before giving up.
    pub max_spins: u32,
}

impl BusyWait {
    /// Creates a spin strategy bounded by `max_spins` counter reads.
    pub const fn new(max_spins: u32) -> Self {
        Self { max_spins }
    }
}

impl Default for BusyWait {
    fn default() -> Self {
        // one 125us period at 600MHz
        Self::new(75_000)
    }
}

impl<C: Clock> SpinWait<C> for BusyWait {
    fn spin_until(&mut self, clock: &C, target_cycles: u32) -> u32 {
        let mut now = clock.cycles();
        let mut spins = 0;
        while cmp_cycles(target_cycles, now) > 0 && spins < self.max_spins {
            core::hint::spin_loop();
            now = clock.cycles();
            spins += 1;
        }
        now
    }
}

/// Clock driven entirely by the caller.
///
/// Used by simulations and tests. Microseconds and cycles advance together
/// at the configured counter frequency; interior mutability lets the clock
/// be advanced through a shared reference while the flight core holds it.
#[derive(Debug)]
pub struct VirtualClock {
    micros: Cell<u32>,
    cycles: Cell<u32>,
    cycles_per_second: u32,
    sub_micro_cycles: Cell<u32>,
}

impl VirtualClock {
    /// Creates a clock at time zero with a cycle counter running at
    /// `cycles_per_second`.
    pub fn new(cycles_per_second: u32) -> Self {
        Self {
            micros: Cell::new(0),
            cycles: Cell::new(0),
            cycles_per_second,
            sub_micro_cycles: Cell::new(0),
        }
    }

    /// Advances both counters by `micros`.
    pub fn advance_micros(&self, micros: u32) {
        self.advance_cycles(micros_to_cycles(micros, self.cycles_per_second));
    }

    /// Advances both counters by `cycles`, carrying fractional microseconds.
    pub fn advance_cycles(&self, cycles: u32) {
        self.cycles.set(self.cycles.get().wrapping_add(cycles));
        let per_micro = (self.cycles_per_second / 1_000_000).max(1);
        let pending = self.sub_micro_cycles.get() as u64 + cycles as u64;
        let whole = (pending / per_micro as u64) as u32;
        self.sub_micro_cycles.set((pending % per_micro as u64) as u32);
        self.micros.set(self.micros.get().wrapping_add(whole));
    }

    /// Moves the clock forward to `target_cycles`. Never moves backwards.
    pub fn advance_to_cycles(&self, target_cycles: u32) {
        let remaining = cmp_cycles(target_cycles, self.cycles.get());
        if remaining > 0 {
            self.advance_cycles(remaining as u32);
        }
    }

    /// Sets both counters, e.g. to exercise wraparound.
    pub fn set(&self, micros: u32, cycles: u32) {
        self.micros.set(micros);
        self.cycles.set(cycles);
        self.sub_micro_cycles.set(0);
    }
}

impl Clock for VirtualClock {
    fn micros(&self) -> u32 {
        self.micros.get()
    }

    fn cycles(&self) -> u32 {
        self.cycles.get()
    }

    fn cycles_per_second(&self) -> u32 {
        self.cycles_per_second
    }
}

/// Spin strategy for [`VirtualClock`]: jumps straight to the deadline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JumpToTarget;

impl SpinWait<VirtualClock> for JumpToTarget {
    fn spin_until(&mut self, clock: &VirtualClock, target_cycles: u32) -> u32 {
        clock.advance_to_cycles(target_cycles);
        clock.cycles()
    }
}

/// "Sample ready" notification shared with the IMU interrupt handler.
///
/// The interrupt is the only writer and the control thread the only reader.
/// The writer publishes the sample timestamp first and then bumps a sequence
/// number with release ordering; the reader loads the sequence number with
/// acquire ordering, so a fresh sequence number always comes with a
/// timestamp at least as new. The reader never writes: it detects new
/// samples by remembering the last sequence number it saw.
#[derive(Debug)]
pub struct SampleSignal {
    sequence: AtomicU32,
    timestamp_cycles: AtomicU32,
}

/// A reading of [`SampleSignal`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleStamp {
    /// Number of samples signalled so far (wrapping).
    pub sequence: u32,
    /// Cycle counter value captured by the interrupt.
    pub timestamp_cycles: u32,
}

impl SampleSignal {
    /// Creates a signal with no samples. Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            timestamp_cycles: AtomicU32::new(0),
        }
    }

    /// Interrupt side: records a new sample taken at `timestamp_cycles`.
    ///
    /// Must only be called from a single context.
    pub fn signal(&self, timestamp_cycles: u32) {
        self.timestamp_cycles.store(timestamp_cycles, Ordering::Relaxed);
        let next = self.sequence.load(Ordering::Relaxed).wrapping_add(1);
        self.sequence.store(next, Ordering::Release);
    }

    /// Control-thread side: reads the latest sequence number and timestamp.
    pub fn read(&self) -> SampleStamp {
        let sequence = self.sequence.load(Ordering::Acquire);
        let timestamp_cycles = self.timestamp_cycles.load(Ordering::Relaxed);
        SampleStamp {
            sequence,
            timestamp_cycles,
        }
    }
}

impl Default for SampleSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wrap-safe comparison treats a wrapped timestamp as later.
    #[test]
    fn test_cmp_time_us_across_wraparound() {
        let before = u32::MAX - 10;
        let after = 5u32;
        assert_eq!(cmp_time_us(after, before), 16);
        assert_eq!(cmp_time_us(before, after), -16);
        assert_eq!(cmp_cycles(100, 100), 0);
    }

    #[test]
    fn test_micros_to_cycles() {
        assert_eq!(micros_to_cycles(125, 600_000_000), 75_000);
        assert_eq!(micros_to_cycles(1, 8_000_000), 8);
    }

    /// Microseconds follow cycles, including fractional carry.
    #[test]
    fn test_virtual_clock_advances_both_counters() {
        let clock = VirtualClock::new(8_000_000);
        clock.advance_cycles(12);
        assert_eq!(clock.micros(), 1);
        clock.advance_cycles(4);
        assert_eq!(clock.micros(), 2);
        assert_eq!(clock.cycles(), 16);
        clock.advance_micros(1000);
        assert_eq!(clock.millis(), 1);
        assert_eq!(clock.cycles(), 8016);
    }

    #[test]
    fn test_virtual_clock_never_moves_backwards() {
        let clock = VirtualClock::new(1_000_000);
        clock.advance_cycles(500);
        clock.advance_to_cycles(100);
        assert_eq!(clock.cycles(), 500);
    }

    #[test]
    fn test_jump_to_target_reaches_deadline_across_wrap() {
        let clock = VirtualClock::new(1_000_000);
        clock.set(0, u32::MAX - 3);
        let now = JumpToTarget.spin_until(&clock, 4);
        assert_eq!(now, 4);
        assert_eq!(clock.micros(), 8);
    }

    /// The busy wait gives up after its iteration bound on a stopped clock.
    #[test]
    fn test_busy_wait_is_bounded() {
        let clock = VirtualClock::new(1_000_000);
        let mut spin = BusyWait::new(10);
        let now = spin.spin_until(&clock, 1_000);
        assert_eq!(now, 0);
    }

    #[test]
    fn test_busy_wait_returns_when_target_passed() {
        let clock = VirtualClock::new(1_000_000);
        clock.advance_cycles(50);
        let now = BusyWait::new(10).spin_until(&clock, 20);
        assert_eq!(now, 50);
    }

    #[test]
    fn test_sample_signal_sequence() {
        let signal = SampleSignal::new();
        let first = signal.read();
        assert_eq!(first.sequence, 0);

        signal.signal(1234);
        let second = signal.read();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.timestamp_cycles, 1234);

        signal.signal(5678);
        assert_eq!(signal.read().sequence, 2);
        assert_eq!(signal.read().timestamp_cycles, 5678);
    }
}
