//! Clock Source: two independent time readings plus the monotonic frequency.
//!
//! Spec contract (spec.md §4.1): `mono_now()` must be non-decreasing within a process
//! and unaffected by administrative wall-clock changes, but may reset across reboots.
//! `wall_now()` tracks a UTC wall instant and may jump arbitrarily if the operator (or
//! an attacker) adjusts the system clock. `mono_frequency()` is a positive constant for
//! the process lifetime.
//!
//! Grounded on `clock-bound-shm/src/common.rs`'s `clock_gettime_safe` wrapper: same
//! `clock_gettime(2)` syscall, same "wrap libc, surface errno" shape, generalized from a
//! single helper function into a small trait so the Keeper can be tested against a mock.

use std::mem::MaybeUninit;

use crate::error::ClockError;

/// Ticks per second exposed by [`SystemClock`]: `clock_gettime` resolves to nanoseconds.
pub const SYSTEM_CLOCK_FREQUENCY: u64 = 1_000_000_000;

/// Abstraction over the monotonic and wall-clock time sources.
///
/// Implementations must be cheap to call repeatedly (the heartbeat calls `mono_now()`
/// on every period) and must never panic.
///
/// A `MockClockSource` is generated by `mockall::automock` whenever this crate (or a
/// downstream crate, via the `test` feature) is built for tests — this is what lets
/// `curfewd`'s Keeper tests simulate reboots and wall-clock jumps deterministically.
#[cfg_attr(any(test, feature = "test"), mockall::automock)]
pub trait ClockSource {
    /// A monotonic tick count, non-decreasing within this process, reset-on-reboot.
    fn mono_now(&self) -> i64;

    /// A wall-clock tick count in a 100-ns UTC grid, may move arbitrarily between calls.
    fn wall_now(&self) -> i64;

    /// Ticks per second of the monotonic source. Constant for the process lifetime.
    fn mono_frequency(&self) -> u64;
}

/// The real clock, backed by `CLOCK_MONOTONIC` and `CLOCK_REALTIME`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Construct a `SystemClock`, probing that the monotonic source is actually usable.
    ///
    /// Spec.md §4.1: "if a platform cannot supply a monotonic source, construction
    /// fails with a fatal kind." We probe once at construction time rather than trust
    /// that `clock_gettime` will keep working — a daemon should not start half-blind.
    pub fn new() -> Result<Self, ClockError> {
        clock_gettime_safe(libc::CLOCK_MONOTONIC)?;
        clock_gettime_safe(libc::CLOCK_REALTIME)?;
        Ok(SystemClock)
    }
}

impl ClockSource for SystemClock {
    fn mono_now(&self) -> i64 {
        // SAFETY: construction already proved CLOCK_MONOTONIC is readable; a later
        // failure here would be a kernel-level anomaly this layer cannot recover from.
        let ts = clock_gettime_safe(libc::CLOCK_MONOTONIC)
            .expect("CLOCK_MONOTONIC became unreadable after SystemClock::new() succeeded");
        timespec_to_nanos(ts)
    }

    fn wall_now(&self) -> i64 {
        let ts = clock_gettime_safe(libc::CLOCK_REALTIME)
            .expect("CLOCK_REALTIME became unreadable after SystemClock::new() succeeded");
        // Convert to 100-ns ticks (spec.md's unit for last_wall_ticks) from nanoseconds.
        timespec_to_nanos(ts) / 100
    }

    fn mono_frequency(&self) -> u64 {
        SYSTEM_CLOCK_FREQUENCY
    }
}

fn timespec_to_nanos(ts: libc::timespec) -> i64 {
    ts.tv_sec * 1_000_000_000 + ts.tv_nsec
}

/// Wrap `clock_gettime(2)`, converting a syscall failure into a [`ClockError`].
fn clock_gettime_safe(clock_id: libc::clockid_t) -> Result<libc::timespec, ClockError> {
    let mut buf: MaybeUninit<libc::timespec> = MaybeUninit::uninit();

    // SAFETY: the pointer passed to clock_gettime is valid for the duration of the call;
    // the buffer is only treated as initialized once the return code confirms success.
    unsafe {
        let ret = libc::clock_gettime(clock_id, buf.as_mut_ptr());
        if ret < 0 {
            Err(ClockError::Unavailable(errno::errno().0))
        } else {
            Ok(buf.assume_init())
        }
    }
}

#[cfg(test)]
mod t_clock {
    use super::*;
    use std::{thread, time};

    #[test]
    fn system_clock_constructs() {
        assert!(SystemClock::new().is_ok());
    }

    #[test]
    fn mono_now_is_non_decreasing() {
        let clock = SystemClock::new().unwrap();
        let one = clock.mono_now();
        thread::sleep(time::Duration::from_millis(5));
        let two = clock.mono_now();
        assert!(two >= one);
    }

    #[test]
    fn wall_now_advances() {
        let clock = SystemClock::new().unwrap();
        let one = clock.wall_now();
        thread::sleep(time::Duration::from_millis(5));
        let two = clock.wall_now();
        assert!(two > one);
    }

    #[test]
    fn frequency_is_fixed() {
        let clock = SystemClock::new().unwrap();
        assert_eq!(clock.mono_frequency(), SYSTEM_CLOCK_FREQUENCY);
    }
}
