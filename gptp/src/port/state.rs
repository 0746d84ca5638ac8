use core::fmt::{Display, Formatter};

use crate::{
    datastructures::common::PortIdentity,
    time::{Time, Timestamp},
};

/// The protocol state of a port, *802.1AS-2020 section 10.3.12*
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum PortState {
    #[default]
    Initializing,
    Faulty,
    Disabled,
    Listening,
    PreMaster,
    Master,
    Passive,
    Uncalibrated,
    Slave(SlaveState),
}

impl PortState {
    /// The numeric encoding published over IPC
    pub fn as_u8(&self) -> u8 {
        match self {
            PortState::Initializing => 1,
            PortState::Faulty => 2,
            PortState::Disabled => 3,
            PortState::Listening => 4,
            PortState::PreMaster => 5,
            PortState::Master => 6,
            PortState::Passive => 7,
            PortState::Uncalibrated => 8,
            PortState::Slave(_) => 9,
        }
    }

    /// Whether this port takes part in the protocol at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, PortState::Disabled | PortState::Faulty)
    }
}

impl Display for PortState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PortState::Initializing => write!(f, "Initializing"),
            PortState::Faulty => write!(f, "Faulty"),
            PortState::Disabled => write!(f, "Disabled"),
            PortState::Listening => write!(f, "Listening"),
            PortState::PreMaster => write!(f, "PreMaster"),
            PortState::Master => write!(f, "Master"),
            PortState::Passive => write!(f, "Passive"),
            PortState::Uncalibrated => write!(f, "Uncalibrated"),
            PortState::Slave(_) => write!(f, "Slave"),
        }
    }
}

/// Slave-side correlation state between a sync and its follow-up
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlaveState {
    /// The most recent sync still waiting for its follow-up. Replaced on
    /// every newer sync, never two pending at once.
    pub(super) retained_sync: Option<RetainedSync>,
    /// Follow-ups whose `(source, sequence id)` did not match the retained
    /// sync, in a row
    pub(super) wrong_correlation_run: u32,
    /// Arrival of the previous processed sync, for jitter monitoring
    pub(super) last_sync_arrival: Option<Time>,
    /// When this port started tracking the current master, for convergence
    /// monitoring
    pub(super) sync_start: Option<Time>,
    pub(super) converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RetainedSync {
    pub(super) sequence_id: u16,
    pub(super) source_port_identity: PortIdentity,
    pub(super) recv_time: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_encoding_is_stable() {
        assert_eq!(PortState::Initializing.as_u8(), 1);
        assert_eq!(PortState::Master.as_u8(), 6);
        assert_eq!(PortState::Slave(SlaveState::default()).as_u8(), 9);
    }

    #[test]
    fn enabled_states() {
        assert!(PortState::Listening.is_enabled());
        assert!(PortState::Master.is_enabled());
        assert!(!PortState::Faulty.is_enabled());
        assert!(!PortState::Disabled.is_enabled());
    }
}
