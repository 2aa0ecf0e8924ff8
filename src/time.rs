/*! Virtual time for the simulated network.

The simulator runs on a discrete virtual clock with nanosecond resolution;
nothing in this crate reads the wall clock. [Instant] is a point on that
clock, [Duration] a distance between two points. The event kernel advances
the clock and passes the current `Instant` into every entry point.
*/

use core::{fmt, ops};

/// A point on the virtual timeline, in nanoseconds since simulation start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant {
    nanos: i64,
}

impl Instant {
    pub const ZERO: Instant = Instant::from_nanos(0);

    /// Sentinel for "never": flows that run until the end of the simulation
    /// carry this as their stop time.
    pub const FAR_FUTURE: Instant = Instant::from_nanos(i64::MAX / 2);

    pub const fn from_nanos(nanos: i64) -> Instant {
        Instant { nanos }
    }

    pub const fn from_micros(micros: i64) -> Instant {
        Instant {
            nanos: micros * 1_000,
        }
    }

    pub const fn from_millis(millis: i64) -> Instant {
        Instant {
            nanos: millis * 1_000_000,
        }
    }

    pub const fn from_secs(secs: i64) -> Instant {
        Instant {
            nanos: secs * 1_000_000_000,
        }
    }

    pub const fn total_nanos(&self) -> i64 {
        self.nanos
    }

    pub const fn total_micros(&self) -> i64 {
        self.nanos / 1_000
    }

    pub const fn total_millis(&self) -> i64 {
        self.nanos / 1_000_000
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ns", self.nanos)
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_nanos(self.nanos + rhs.nanos as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.nanos += rhs.nanos as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_nanos(self.nanos - rhs.nanos as i64)
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    /// Distance between two instants; saturates at zero when `rhs` is later.
    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(rhs.nanos).max(0) as u64)
    }
}

/// A span of virtual time, in nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration::from_nanos(0);

    pub const fn from_nanos(nanos: u64) -> Duration {
        Duration { nanos }
    }

    pub const fn from_micros(micros: u64) -> Duration {
        Duration {
            nanos: micros * 1_000,
        }
    }

    pub const fn from_millis(millis: u64) -> Duration {
        Duration {
            nanos: millis * 1_000_000,
        }
    }

    pub const fn from_secs(secs: u64) -> Duration {
        Duration {
            nanos: secs * 1_000_000_000,
        }
    }

    pub const fn total_nanos(&self) -> u64 {
        self.nanos
    }

    pub const fn total_micros(&self) -> u64 {
        self.nanos / 1_000
    }

    pub const fn total_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ns", self.nanos)
    }
}

impl ops::Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::from_nanos(self.nanos + rhs.nanos)
    }
}

impl ops::AddAssign<Duration> for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.nanos += rhs.nanos;
    }
}

impl ops::Sub<Duration> for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(rhs.nanos))
    }
}

impl ops::Mul<u32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        Duration::from_nanos(self.nanos * rhs as u64)
    }
}

impl ops::Div<u32> for Duration {
    type Output = Duration;

    fn div(self, rhs: u32) -> Duration {
        Duration::from_nanos(self.nanos / rhs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_ops() {
        let t = Instant::from_micros(4);
        assert_eq!(t + Duration::from_nanos(500), Instant::from_nanos(4_500));
        assert_eq!(t - Duration::from_micros(1), Instant::from_micros(3));
        assert_eq!(
            Instant::from_micros(7) - Instant::from_micros(3),
            Duration::from_micros(4)
        );
        // saturating difference
        assert_eq!(
            Instant::from_micros(3) - Instant::from_micros(7),
            Duration::ZERO
        );
    }

    #[test]
    fn duration_ops() {
        let d = Duration::from_micros(500);
        assert_eq!(d.total_nanos(), 500_000);
        assert_eq!(d * 3, Duration::from_micros(1_500));
        assert_eq!(d / 2, Duration::from_micros(250));
        assert_eq!(d - Duration::from_secs(1), Duration::ZERO);
    }

    #[test]
    fn conversions() {
        assert_eq!(Instant::from_millis(1).total_micros(), 1_000);
        assert_eq!(Duration::from_secs(2).total_millis(), 2_000);
    }
}
