//! Implementation of the abstract clock for the linux platform

use clock_steering::{unix::UnixClock, Clock as _, TimeOffset};
use gptp::time::{Duration, Time};

/// The pair of clocks a port disciplines and reports on: the steered
/// (device) clock and the OS realtime clock.
///
/// With a PTP hardware clock the device clock is the PHC; without one both
/// sides read the system clock and precision is what it is.
#[derive(Debug, Clone)]
pub struct LinuxClock {
    device: UnixClock,
    system: UnixClock,
}

impl LinuxClock {
    /// Discipline the system clock directly (software timestamping)
    pub fn system() -> Self {
        Self {
            device: UnixClock::CLOCK_REALTIME,
            system: UnixClock::CLOCK_REALTIME,
        }
    }

    /// Discipline the PTP hardware clock with the given index
    pub fn open_phc(index: u32) -> Result<Self, std::io::Error> {
        let path = format!("/dev/ptp{index}");
        Ok(Self {
            device: UnixClock::open(path)?,
            system: UnixClock::CLOCK_REALTIME,
        })
    }
}

fn timestamp_to_time(timestamp: clock_steering::Timestamp) -> Time {
    let seconds = timestamp.seconds.max(0) as u64;
    Time::from_secs(seconds) + Duration::from_nanos(timestamp.nanos as i64)
}

impl gptp::Clock for LinuxClock {
    type Error = clock_steering::unix::Error;

    fn now(&self) -> Time {
        match self.device.now() {
            Ok(timestamp) => timestamp_to_time(timestamp),
            Err(error) => {
                // A clock that cannot be read cannot be disciplined either;
                // the port will fault on the next adjustment
                log::error!("could not read device clock: {:?}", error);
                Time::default()
            }
        }
    }

    fn system_now(&self) -> Time {
        match self.system.now() {
            Ok(timestamp) => timestamp_to_time(timestamp),
            Err(error) => {
                log::error!("could not read system clock: {:?}", error);
                Time::default()
            }
        }
    }

    fn adjust_rate(&mut self, ppm: f64) -> Result<(), Self::Error> {
        self.device.set_frequency(ppm)?;
        Ok(())
    }

    fn adjust_phase(&mut self, offset: Duration) -> Result<(), Self::Error> {
        let nanos = offset.nanos_rounded();
        let offset = TimeOffset {
            seconds: nanos.div_euclid(1_000_000_000),
            nanos: nanos.rem_euclid(1_000_000_000) as u32,
        };
        self.device.step_clock(offset)?;
        Ok(())
    }
}
