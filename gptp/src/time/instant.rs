use core::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use az::Az;
use fixed::types::{I96F32, U96F32};

use super::Duration;
use crate::datastructures::common::TimeInterval;

/// A point in time on some clock's timescale, with nanosecond precision and
/// sub-nanosecond fraction.
///
/// A `Time` does not record which clock it was read from; see
/// [`Timestamp`](`super::Timestamp`) for event timestamps that carry their
/// capture epoch.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Time {
    /// Time in nanos
    inner: U96F32,
}

impl Time {
    /// Create an instance with the given amount of seconds from the origin
    pub fn from_secs(secs: u64) -> Self {
        let inner = secs.az::<U96F32>() * 1_000_000_000.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of milliseconds from the
    /// origin
    pub fn from_millis(millis: u64) -> Self {
        let inner = millis.az::<U96F32>() * 1_000_000.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of microseconds from the
    /// origin
    pub fn from_micros(micros: u64) -> Self {
        let inner = micros.az::<U96F32>() * 1_000.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds from the
    /// origin
    pub fn from_nanos(nanos: u64) -> Self {
        let inner = nanos.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds from the
    /// origin, including a sub-nanosecond fraction
    pub fn from_fixed_nanos<F: Into<U96F32>>(nanos: F) -> Self {
        Self {
            inner: nanos.into(),
        }
    }

    /// The number of whole seconds since the origin
    pub fn secs(&self) -> u64 {
        (self.inner / 1_000_000_000.az::<U96F32>()).to_num()
    }

    /// The nanoseconds into the current second
    pub fn subsec_nanos(&self) -> u32 {
        (self.inner % 1_000_000_000.az::<U96F32>()).to_num()
    }

    /// The number of nanoseconds since the origin, with sub-nanosecond
    /// fraction
    pub fn nanos(&self) -> U96F32 {
        self.inner
    }

    /// The number of whole nanoseconds since the origin
    pub fn nanos_rounded(&self) -> u64 {
        self.inner.to_num()
    }

    /// The sub-nanosecond fraction as a [`TimeInterval`]
    ///
    /// Used to fill the correction field with the part of a timestamp that
    /// the 10-byte wire representation cannot carry.
    pub fn subnano(&self) -> TimeInterval {
        let inter: I96F32 = self.inner.frac().to_num();
        TimeInterval(inter.to_num())
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Self::Output {
        if rhs.nanos().is_negative() {
            Time {
                inner: self.inner.saturating_sub(rhs.nanos().unsigned_abs()),
            }
        } else {
            Time {
                inner: self.inner.saturating_add(rhs.nanos().unsigned_abs()),
            }
        }
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Self::Output {
        self + -rhs
    }
}

impl SubAssign<Duration> for Time {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    fn sub(self, rhs: Time) -> Self::Output {
        if self.inner >= rhs.inner {
            Duration::from_fixed_nanos(I96F32::from_num(self.inner - rhs.inner))
        } else {
            -(rhs - self)
        }
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Time")
            .field("secs", &self.secs())
            .field("nanos", &self.subsec_nanos())
            .finish()
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs(), self.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_is_symmetric() {
        let a = Time::from_nanos(1200);
        let b = Time::from_nanos(1000);
        assert_eq!(a - b, Duration::from_nanos(200));
        assert_eq!(b - a, Duration::from_nanos(-200));
    }

    #[test]
    fn add_duration() {
        let t = Time::from_nanos(1000);
        assert_eq!(t + Duration::from_nanos(50), Time::from_nanos(1050));
        assert_eq!(t + Duration::from_nanos(-50), Time::from_nanos(950));
        // Time cannot go before the origin
        assert_eq!(t + Duration::from_nanos(-2000), Time::from_nanos(0));
    }

    #[test]
    fn second_split() {
        let t = Time::from_nanos(3_000_000_123);
        assert_eq!(t.secs(), 3);
        assert_eq!(t.subsec_nanos(), 123);
    }
}
