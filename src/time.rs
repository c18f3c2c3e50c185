//! Simulation time and sequence-number arithmetic.
//!
//! The host simulator owns the clock; every entry point of the engine takes
//! the current `Time` explicitly. `Time` is signed so that "already expired"
//! markers such as `now - 1s` stay representable at the start of a run.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A point on the simulation clock, in nanoseconds since the epoch of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(i64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub const fn from_nanos(ns: i64) -> Self {
        Time(ns)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Time(ms.saturating_mul(1_000_000))
    }

    pub const fn from_secs(secs: i64) -> Self {
        Time(secs.saturating_mul(1_000_000_000))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }
}

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(nanos(rhs)))
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Time {
        Time(self.0.saturating_sub(nanos(rhs)))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Largest forward distance at which `a` still counts as newer than `b`.
const SEQ_HALF: u16 = 32767;

/// Wrap-safe "is `a` newer than `b`" for 16-bit sequence numbers (RFC 3626 §19).
pub fn seq_newer(a: u16, b: u16) -> bool {
    (a > b && a - b <= SEQ_HALF) || (b > a && b - a > SEQ_HALF)
}
