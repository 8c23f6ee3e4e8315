//! Simulated time
//!
//! Time is an integer count of picoseconds. Picosecond resolution is needed
//! because serial clock periods are derived from a frequency and rounded to
//! a 10 ps grid.

use core::fmt;

/// Simulated time in picoseconds
pub type SimTime = u64;

/// One picosecond
pub const PS: SimTime = 1;
/// One nanosecond
pub const NS: SimTime = 1_000;
/// One microsecond
pub const US: SimTime = 1_000_000;
/// One millisecond
pub const MS: SimTime = 1_000_000_000;

/// Nanoseconds to simulated time
pub const fn ns(value: u64) -> SimTime {
    value * NS
}

/// Microseconds to simulated time
pub const fn us(value: u64) -> SimTime {
    value * US
}

/// Milliseconds to simulated time
pub const fn ms(value: u64) -> SimTime {
    value * MS
}

/// Fractional nanoseconds to simulated time, rounded to the nearest picosecond
pub fn ns_f64(value: f64) -> SimTime {
    if value <= 0.0 {
        0
    } else {
        (value * NS as f64).round() as SimTime
    }
}

/// Human readable rendering of a time value (`12.5 ns`, `60 us`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pretty(pub SimTime);

impl fmt::Display for Pretty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.0;
        if t >= MS && t % US == 0 {
            write!(f, "{} ms", t as f64 / MS as f64)
        } else if t >= US && t % NS == 0 {
            write!(f, "{} us", t as f64 / US as f64)
        } else if t >= NS {
            write!(f, "{} ns", t as f64 / NS as f64)
        } else {
            write!(f, "{} ps", t)
        }
    }
}
