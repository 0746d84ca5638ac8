use core::fmt;

use super::{Duration, Time};

/// Identifies the capture path that produced a [`Timestamp`].
///
/// Hardware timestampers are re-armed when their interface or clock source
/// changes; every re-arm starts a new epoch. Timestamps from different
/// epochs come from different timescales and must never be combined.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimestamperEpoch(pub u16);

impl TimestamperEpoch {
    /// The epoch of the software (OS clock) fallback timestamper.
    pub const SOFTWARE: Self = Self(0);

    /// The epoch that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Default for TimestamperEpoch {
    fn default() -> Self {
        Self::SOFTWARE
    }
}

/// A locally captured event timestamp: a [`Time`] tagged with the
/// [`TimestamperEpoch`] it was captured in.
///
/// Arithmetic between two timestamps is only defined within one epoch;
/// [`Timestamp::duration_since`] returns [`None`] across epochs so that a
/// timestamper restart mid-exchange invalidates the exchange instead of
/// producing a garbage delay.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct Timestamp {
    time: Time,
    epoch: TimestamperEpoch,
}

impl Timestamp {
    pub fn new(time: Time, epoch: TimestamperEpoch) -> Self {
        Self { time, epoch }
    }

    /// A timestamp read from the software fallback clock.
    pub fn software(time: Time) -> Self {
        Self {
            time,
            epoch: TimestamperEpoch::SOFTWARE,
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn epoch(&self) -> TimestamperEpoch {
        self.epoch
    }

    /// The elapsed time since `earlier`, or [`None`] if the two timestamps
    /// were captured in different epochs.
    pub fn duration_since(&self, earlier: &Timestamp) -> Option<Duration> {
        (self.epoch == earlier.epoch).then(|| self.time - earlier.time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.time, self.epoch.0)
    }
}
