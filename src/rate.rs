/*! Link and flow rates.

[Rate] is a bandwidth in bits per second. It is the unit every rate-based
congestion-control algorithm works in: the NIC line rate is the ceiling, the
configured minimum rate is the floor, and updates move between them with
additive steps and multiplicative scaling.
*/

use core::{fmt, ops, str};

use crate::time::Duration;

/// A transmission rate in bits per second.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u64);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    pub const fn from_bps(bits_per_sec: u64) -> Rate {
        Rate(bits_per_sec)
    }

    pub const fn from_kbps(kbps: u64) -> Rate {
        Rate(kbps * 1_000)
    }

    pub const fn from_mbps(mbps: u64) -> Rate {
        Rate(mbps * 1_000_000)
    }

    pub const fn from_gbps(gbps: u64) -> Rate {
        Rate(gbps * 1_000_000_000)
    }

    /// Build a rate from a floating-point bit rate, clamping at zero.
    pub fn from_bps_f64(bits_per_sec: f64) -> Rate {
        Rate(bits_per_sec.max(0.0) as u64)
    }

    pub const fn bits_per_sec(&self) -> u64 {
        self.0
    }

    /// Time to put `bytes` on the wire at this rate.
    pub fn tx_time(&self, bytes: u32) -> Duration {
        let bps = self.0.max(1) as u128;
        let nanos = (bytes as u128 * 8 * 1_000_000_000) / bps;
        Duration::from_nanos(nanos as u64)
    }

    /// Bandwidth-delay product in bytes.
    pub fn bdp_bytes(&self, rtt: Duration) -> u64 {
        ((self.0 as u128 * rtt.total_nanos() as u128) / 8 / 1_000_000_000) as u64
    }

    /// This rate as a fraction of `other`.
    pub fn ratio(&self, other: Rate) -> f64 {
        self.0 as f64 / other.0.max(1) as f64
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 >= 1_000_000_000 && self.0 % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", self.0 / 1_000_000_000)
        } else if self.0 >= 1_000_000 && self.0 % 1_000_000 == 0 {
            write!(f, "{}Mbps", self.0 / 1_000_000)
        } else {
            write!(f, "{}bps", self.0)
        }
    }
}

impl ops::Add<Rate> for Rate {
    type Output = Rate;

    fn add(self, rhs: Rate) -> Rate {
        Rate(self.0.saturating_add(rhs.0))
    }
}

impl ops::Sub<Rate> for Rate {
    type Output = Rate;

    fn sub(self, rhs: Rate) -> Rate {
        Rate(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Mul<f64> for Rate {
    type Output = Rate;

    fn mul(self, rhs: f64) -> Rate {
        Rate::from_bps_f64(self.0 as f64 * rhs)
    }
}

impl ops::Div<f64> for Rate {
    type Output = Rate;

    fn div(self, rhs: f64) -> Rate {
        Rate::from_bps_f64(self.0 as f64 / rhs)
    }
}

impl ops::Div<u64> for Rate {
    type Output = Rate;

    fn div(self, rhs: u64) -> Rate {
        Rate(self.0 / rhs.max(1))
    }
}

/// Parsing a rate from a configuration string failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseRateError;

impl fmt::Display for ParseRateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid rate")
    }
}

impl std::error::Error for ParseRateError {}

impl str::FromStr for Rate {
    type Err = ParseRateError;

    /// Accepts the configuration forms `100Mbps`, `100Mb/s`, `40Gbps`,
    /// `1.5Gb/s`, or a bare bit count.
    fn from_str(s: &str) -> Result<Rate, ParseRateError> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let value: f64 = num.parse().map_err(|_| ParseRateError)?;
        let scale = match unit.trim_end_matches("/s").trim_end_matches("ps") {
            "" | "b" => 1.0,
            "Kb" | "kb" => 1e3,
            "Mb" => 1e6,
            "Gb" => 1e9,
            _ => return Err(ParseRateError),
        };
        Ok(Rate::from_bps_f64(value * scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_time() {
        // 1000 bytes at 100Gbps is 80ns
        assert_eq!(
            Rate::from_gbps(100).tx_time(1000),
            Duration::from_nanos(80)
        );
        assert_eq!(Rate::from_mbps(100).tx_time(1000), Duration::from_micros(80));
    }

    #[test]
    fn bdp() {
        // 100Gbps * 8us = 100_000 bytes
        assert_eq!(
            Rate::from_gbps(100).bdp_bytes(Duration::from_micros(8)),
            100_000
        );
    }

    #[test]
    fn arithmetic() {
        let r = Rate::from_gbps(100);
        assert_eq!(r * 0.5, Rate::from_gbps(50));
        assert_eq!(r / 4.0, Rate::from_gbps(25));
        assert_eq!(r + Rate::from_mbps(5), Rate::from_bps(100_005_000_000));
        assert_eq!(Rate::from_mbps(5) - r, Rate::ZERO);
    }

    #[test]
    fn parse() {
        assert_eq!("100Mbps".parse::<Rate>().unwrap(), Rate::from_mbps(100));
        assert_eq!("100Mb/s".parse::<Rate>().unwrap(), Rate::from_mbps(100));
        assert_eq!("40Gbps".parse::<Rate>().unwrap(), Rate::from_gbps(40));
        assert_eq!("1.5Gb/s".parse::<Rate>().unwrap(), Rate::from_mbps(1500));
        assert_eq!("12345".parse::<Rate>().unwrap(), Rate::from_bps(12345));
        assert!("12 parsecs".parse::<Rate>().is_err());
    }
}
