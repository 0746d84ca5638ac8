//! The cross-port election: pick the best announce any port received,
//! compare it against our own claim, and derive a role for every port.

use arrayvec::ArrayVec;

use crate::{
    datastructures::{
        common::{ClockIdentity, PortIdentity, SystemIdentity, TimeSource},
        datasets::{DefaultDs, GrandmasterDs, MAX_PATH_TRACE},
    },
    ptp_instance::PortRecord,
};

/// A qualified announce as retained by a port: everything the election and
/// the grandmaster snapshot need, decoupled from the wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRecord {
    pub system_identity: SystemIdentity,
    pub steps_removed: u16,
    pub time_source: TimeSource,
    pub current_utc_offset: i16,
    pub source_port_identity: PortIdentity,
    pub path_trace: ArrayVec<ClockIdentity, MAX_PATH_TRACE>,
    /// Interface index of the port that received this announce
    pub received_on_port: u32,
}

impl AnnounceRecord {
    pub fn grandmaster_identity(&self) -> ClockIdentity {
        self.system_identity.clock_identity()
    }

    /// The grandmaster snapshot a clock tracking this announce advertises
    /// downstream: one more step removed, same time properties.
    pub(crate) fn as_grandmaster(&self) -> GrandmasterDs {
        GrandmasterDs {
            system_identity: self.system_identity,
            steps_removed: self.steps_removed + 1,
            time_source: self.time_source,
            current_utc_offset: self.current_utc_offset,
            path_trace: self.path_trace.clone(),
        }
    }
}

/// The role the election recommends for one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecommendedRole {
    Master,
    Slave,
}

#[derive(Debug)]
pub(crate) struct StateDecision {
    /// The grandmaster the clock should track from now on
    pub(crate) grandmaster: GrandmasterDs,
    /// The grandmaster named by the winning announce, for external-master
    /// change tracking
    pub(crate) ebest_identity: ClockIdentity,
    /// Interface index of the port that becomes slave, `None` when we are
    /// the grandmaster ourselves
    pub(crate) slave_port: Option<u32>,
    /// The best external announce named a different grandmaster than last
    /// time; transitioning ports must re-arm their sync setpoint
    pub(crate) changed_external_master: bool,
}

/// One pass of the state decision, *802.1AS-2020 section 10.3.3* reduced to
/// the single-domain, single-slave case gPTP prescribes.
///
/// Returns `None` when no port holds a qualified announce; the caller keeps
/// all current roles in that case.
pub(crate) fn run_state_decision(
    own: &DefaultDs,
    last_ebest: Option<ClockIdentity>,
    records: &[PortRecord],
) -> Option<StateDecision> {
    // EBest: the best qualified announce across all operational ports
    let ebest = records
        .iter()
        .filter(|record| record.enabled)
        .filter_map(|record| record.erbest.as_ref())
        .min_by_key(|announce| announce.system_identity)?;

    let changed_external_master = last_ebest != Some(ebest.grandmaster_identity());

    if own.system_identity().is_better_than(&ebest.system_identity) {
        // We outrank every announce we heard: grandmaster is us, every
        // operational port distributes our time.
        Some(StateDecision {
            grandmaster: GrandmasterDs::claimed_by_self(own),
            ebest_identity: ebest.grandmaster_identity(),
            slave_port: None,
            changed_external_master,
        })
    } else {
        Some(StateDecision {
            grandmaster: ebest.as_grandmaster(),
            ebest_identity: ebest.grandmaster_identity(),
            slave_port: Some(ebest.received_on_port),
            changed_external_master,
        })
    }
}
