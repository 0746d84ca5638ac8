use core::{
    fmt,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign},
};

use az::Az;
use fixed::types::I96F32;

use super::Interval;
use crate::datastructures::common::TimeInterval;

/// A duration of time with nanosecond precision and sub-nanosecond fraction.
///
/// May be negative: the difference of two [`Time`](`super::Time`) values is a
/// `Duration` regardless of their order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Duration {
    /// Time in nanos
    inner: I96F32,
}

impl Duration {
    /// A duration of zero length
    pub const ZERO: Duration = Duration {
        inner: I96F32::ZERO,
    };

    /// Create an instance with the given amount of seconds
    pub fn from_secs(secs: i64) -> Self {
        let inner = secs.az::<I96F32>() * 1_000_000_000.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of milliseconds
    pub fn from_millis(millis: i64) -> Self {
        let inner = millis.az::<I96F32>() * 1_000_000.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of microseconds
    pub fn from_micros(micros: i64) -> Self {
        let inner = micros.az::<I96F32>() * 1_000.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds
    pub fn from_nanos(nanos: i64) -> Self {
        let inner = nanos.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds, including a
    /// sub-nanosecond fraction
    pub fn from_fixed_nanos<F: Into<I96F32>>(nanos: F) -> Self {
        Self {
            inner: nanos.into(),
        }
    }

    /// Create an instance from an [`Interval`] (log₂ seconds)
    pub fn from_interval(interval: Interval) -> Self {
        let seconds = interval.seconds();
        Self::from_fixed_nanos(I96F32::from_num(seconds * 1e9))
    }

    /// The number of nanoseconds, with sub-nanosecond fraction
    pub fn nanos(&self) -> I96F32 {
        self.inner
    }

    /// The number of whole nanoseconds, rounded towards zero
    pub fn nanos_rounded(&self) -> i64 {
        self.inner.to_num()
    }

    /// The number of nanoseconds as a float, losing sub-nanosecond precision
    pub fn nanos_lossy(&self) -> f64 {
        self.inner.az()
    }

    /// The number of whole seconds, rounded towards zero
    pub fn secs(&self) -> i64 {
        (self.inner / 1_000_000_000.az::<I96F32>()).to_num()
    }

    /// The absolute value of this duration
    pub fn abs(self) -> Duration {
        Self {
            inner: self.inner.abs(),
        }
    }

    /// Clamp this duration to the given inclusive range
    pub fn clamp(self, min: Duration, max: Duration) -> Duration {
        Self {
            inner: self.inner.clamp(min.inner, max.inner),
        }
    }

    /// Convert into a [`core::time::Duration`], clamping negative values to
    /// zero
    pub fn to_core_duration(self) -> core::time::Duration {
        if self.inner.is_negative() {
            core::time::Duration::ZERO
        } else {
            core::time::Duration::from_nanos(self.nanos_rounded() as u64)
        }
    }
}

impl From<TimeInterval> for Duration {
    fn from(interval: TimeInterval) -> Self {
        Self::from_fixed_nanos(interval.0)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Self) -> Self::Output {
        Duration {
            inner: self.inner + rhs.inner,
        }
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        self.inner += rhs.inner;
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration {
            inner: self.inner - rhs.inner,
        }
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        self.inner -= rhs.inner;
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Self::Output {
        Duration { inner: -self.inner }
    }
}

impl Mul<i32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: i32) -> Self::Output {
        Duration {
            inner: self.inner * rhs as i128,
        }
    }
}

impl Mul<f64> for Duration {
    type Output = Duration;

    fn mul(self, rhs: f64) -> Self::Output {
        Duration {
            inner: I96F32::from_num(self.nanos_lossy() * rhs),
        }
    }
}

impl Div<i32> for Duration {
    type Output = Duration;

    fn div(self, rhs: i32) -> Self::Output {
        Duration {
            inner: self.inner / rhs as i128,
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duration")
            .field("nanos", &self.inner)
            .finish()
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Duration::from_secs(2).nanos_rounded(), 2_000_000_000);
        assert_eq!(Duration::from_millis(16).nanos_rounded(), 16_000_000);
        assert_eq!(Duration::from_micros(25).nanos_rounded(), 25_000);
        assert_eq!(Duration::from_nanos(-800_000).secs(), 0);
        assert_eq!(Duration::from_secs(-3).secs(), -3);
    }

    #[test]
    fn interval_expansion() {
        assert_eq!(
            Duration::from_interval(Interval::from_log_2(0)),
            Duration::from_secs(1)
        );
        assert_eq!(
            Duration::from_interval(Interval::from_log_2(-3)),
            Duration::from_millis(125)
        );
    }

    #[test]
    fn arithmetic() {
        let a = Duration::from_nanos(200);
        let b = Duration::from_nanos(150);
        assert_eq!(a - b, Duration::from_nanos(50));
        assert_eq!(b - a, Duration::from_nanos(-50));
        assert_eq!((b - a).abs(), Duration::from_nanos(50));
        assert_eq!((a - b) / 2, Duration::from_nanos(25));
        assert_eq!(a * 3, Duration::from_nanos(600));
    }
}
