use crate::time::{Duration, Time};

/// Clock manipulation and reading
///
/// The engine disciplines whatever implements this; on Linux that is a PTP
/// hardware clock or the system clock. Without hardware support, `now` and
/// `system_now` may read the same OS clock; the servo still converges but
/// precision is degraded.
pub trait Clock {
    type Error: core::fmt::Debug;

    /// The current time of the disciplined (device) clock
    fn now(&self) -> Time;

    /// The current time of the OS system clock
    ///
    /// Read as close as possible to [`now`](`Clock::now`); the pair feeds
    /// the local-to-system frequency ratio published over IPC.
    fn system_now(&self) -> Time;

    /// Slew the clock at the given rate correction in parts per million
    fn adjust_rate(&mut self, ppm: f64) -> Result<(), Self::Error>;

    /// Step the clock phase by the given offset
    fn adjust_phase(&mut self, offset: Duration) -> Result<(), Self::Error>;
}
