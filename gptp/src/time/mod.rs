//! Types that describe points in time ([`Time`]), durations between two
//! instants ([`Duration`], [`Interval`]) and locally captured event
//! timestamps ([`Timestamp`]).
//!
//! These are used throughout `gptp` instead of types from [`std::time`] as
//! they fit closer with the on the wire representation of time in PTP.

mod duration;
mod instant;
mod interval;
mod stamp;

pub use duration::Duration;
pub use instant::Time;
pub use interval::Interval;
pub use stamp::{Timestamp, TimestamperEpoch};
