//! Virtual instant type.
//!
//! The event loop runs on a virtual clock: time only moves when the loop
//! advances it, which makes every timer-driven behavior deterministic and
//! testable without wall-clock sleeps.

use core::fmt;
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A virtual instant, in nanoseconds since the loop's epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a new time from seconds since epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds since epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a number of nanoseconds, saturating at the maximum instant.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Adds a duration, saturating at the maximum instant.
    ///
    /// Durations beyond the representable range clamp to [`Time::MAX`].
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.saturating_add_nanos(nanos)
    }

    /// Returns the duration elapsed since an earlier instant, or zero if
    /// `earlier` is not earlier.
    #[must_use]
    pub const fn since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        self.saturating_add(rhs)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_round_trip() {
        assert_eq!(Time::from_millis(5).as_nanos(), 5_000_000);
        assert_eq!(Time::from_secs(2).as_millis(), 2_000);
        assert_eq!(Time::from_nanos(7).as_nanos(), 7);
    }

    #[test]
    fn saturating_arithmetic() {
        assert_eq!(Time::MAX.saturating_add_nanos(1), Time::MAX);
        assert_eq!(
            Time::ZERO.saturating_add(Duration::from_millis(3)),
            Time::from_millis(3)
        );
        assert_eq!(Time::MAX.saturating_add(Duration::MAX), Time::MAX);
    }

    #[test]
    fn since_is_zero_for_reversed_order() {
        let a = Time::from_millis(1);
        let b = Time::from_millis(2);
        assert_eq!(b.since(a), Duration::from_millis(1));
        assert_eq!(a.since(b), Duration::ZERO);
    }

    #[test]
    fn add_duration_operator() {
        let t = Time::from_millis(1) + Duration::from_millis(2);
        assert_eq!(t, Time::from_millis(3));
    }
}
