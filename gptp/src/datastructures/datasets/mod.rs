//! Instance-wide data sets shared between the ports of a clock

use arrayvec::ArrayVec;

use super::common::{ClockIdentity, ClockQuality, SystemIdentity, TimeSource};
use crate::config::{InstanceConfig, Profile};

/// Most announces stay well below this; a trace longer than the cap cannot
/// be relayed by us and is treated like a full hop-count.
pub const MAX_PATH_TRACE: usize = 32;

/// The static description of this clock, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDs {
    pub clock_identity: ClockIdentity,
    pub priority_1: u8,
    pub priority_2: u8,
    pub clock_quality: ClockQuality,
    pub domain_number: u8,
}

impl DefaultDs {
    pub fn new(config: &InstanceConfig, profile: &Profile) -> Self {
        Self {
            clock_identity: config.clock_identity,
            priority_1: config.priority_1.unwrap_or(profile.priority1),
            priority_2: config.priority_2.unwrap_or(profile.priority2),
            clock_quality: profile.clock_quality(),
            domain_number: config.domain_number,
        }
    }

    /// The priority vector this clock would win an election with
    pub fn system_identity(&self) -> SystemIdentity {
        SystemIdentity::new(
            self.priority_1,
            self.clock_quality,
            self.priority_2,
            self.clock_identity,
        )
    }

    /// A priority1 of 255 marks a slave-only clock which never takes part in
    /// the election
    pub fn slave_only(&self) -> bool {
        self.priority_1 == 255
    }
}

/// The grandmaster this clock currently tracks; either itself or the clock
/// advertised by the best received announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrandmasterDs {
    pub system_identity: SystemIdentity,
    pub steps_removed: u16,
    pub time_source: TimeSource,
    pub current_utc_offset: i16,
    /// Clock identities between the grandmaster and us, oldest first
    pub path_trace: ArrayVec<ClockIdentity, MAX_PATH_TRACE>,
}

impl GrandmasterDs {
    /// Fill the grandmaster fields with our own identity
    pub fn claimed_by_self(default_ds: &DefaultDs) -> Self {
        Self {
            system_identity: default_ds.system_identity(),
            steps_removed: 0,
            time_source: TimeSource::InternalOscillator,
            current_utc_offset: 0,
            path_trace: ArrayVec::new(),
        }
    }

    pub fn grandmaster_identity(&self) -> ClockIdentity {
        self.system_identity.clock_identity()
    }
}
