//! Port-side best master handling: announce qualification, receipt
//! timeouts, and applying the roles the election hands out.

use arrayvec::ArrayVec;

use super::{Port, PortAction, PortActionIterator, TimerKind};
use crate::{
    bmc::{run_state_decision, AnnounceRecord, RecommendedRole},
    clock::Clock,
    config::ProfileKind,
    datastructures::{
        common::ClockIdentity,
        datasets::{GrandmasterDs, MAX_PATH_TRACE},
        messages::AnnounceMessage,
    },
    port::state::{PortState, SlaveState},
};

/// Announces at or above this hop count are spent, *802.1AS 10.3.3*
const MAX_STEPS_REMOVED: u16 = 255;

/// The debounce before a changed announce set triggers the election
const STATE_CHANGE_DEBOUNCE: core::time::Duration = core::time::Duration::from_millis(16);

/// Interval timers start at this bootstrap value when a port turns master
/// so the first transmissions go out right away
const BOOTSTRAP_INTERVAL: core::time::Duration = core::time::Duration::from_millis(16);

impl<'a, C: Clock> Port<'a, C> {
    /// Qualify a received announce and retain it for the election
    pub(super) fn handle_announce(
        &mut self,
        message: &AnnounceMessage,
        path_trace_bytes: Option<&[u8]>,
    ) -> PortActionIterator<'_> {
        if message.steps_removed >= MAX_STEPS_REMOVED {
            log::debug!(
                "ignoring announce with stepsRemoved {}",
                message.steps_removed
            );
            self.stats.rx_ptp_discards += 1;
            return actions![];
        }

        let own_identity = self.port_identity.clock_identity;
        if message.header.source_port_identity.clock_identity == own_identity {
            // Our own announce reflected back at us
            return actions![];
        }

        let mut path_trace: ArrayVec<ClockIdentity, MAX_PATH_TRACE> = ArrayVec::new();
        for chunk in path_trace_bytes.unwrap_or_default().chunks_exact(8) {
            let identity = ClockIdentity(chunk.try_into().unwrap());
            if identity == own_identity {
                // The announce already went through us once; accepting it
                // would close a loop
                log::debug!("ignoring announce whose path trace contains us");
                self.stats.rx_ptp_discards += 1;
                return actions![];
            }
            if path_trace.try_push(identity).is_err() {
                // Treat an overlong trace like a spent hop count
                self.stats.rx_ptp_discards += 1;
                return actions![];
            }
        }

        let record = AnnounceRecord {
            system_identity: message.system_identity(),
            steps_removed: message.steps_removed,
            time_source: message.time_source,
            current_utc_offset: message.current_utc_offset,
            source_port_identity: message.header.source_port_identity,
            path_trace,
            received_on_port: self.ifindex,
        };

        let mut shared = self.instance_state.borrow_mut();
        if let Some(port_record) = shared.record_for(self.ifindex) {
            port_record.erbest = Some(record);
        }
        drop(shared);

        actions![
            PortAction::ResetTimer {
                kind: TimerKind::StateChange,
                duration: STATE_CHANGE_DEBOUNCE,
            },
            PortAction::ResetTimer {
                kind: TimerKind::AnnounceReceipt,
                duration: self
                    .profile
                    .announce_receipt_timeout(self.announce_interval)
                    .to_core_duration(),
            }
        ]
    }

    /// No announce arrived within the timeout: claim the grandmaster role
    pub fn handle_announce_receipt_timer(&mut self) -> PortActionIterator<'_> {
        self.stats.announce_receipt_timeouts += 1;
        self.handle_receipt_timeout(TimerKind::AnnounceReceipt)
    }

    /// The master stopped sending syncs
    pub fn handle_sync_receipt_timer(&mut self) -> PortActionIterator<'_> {
        self.stats.sync_receipt_timeouts += 1;

        // An automotive node never elects itself; it just keeps waiting
        if self.profile.kind == ProfileKind::Automotive {
            return actions![PortAction::ResetTimer {
                kind: TimerKind::SyncReceipt,
                duration: self
                    .profile
                    .sync_receipt_timeout(self.sync_interval)
                    .to_core_duration(),
            }];
        }

        self.handle_receipt_timeout(TimerKind::SyncReceipt)
    }

    fn handle_receipt_timeout(&mut self, expired: TimerKind) -> PortActionIterator<'_> {
        if self.instance_state.borrow().default_ds.slave_only() {
            return actions![];
        }

        let rearm = PortAction::ResetTimer {
            kind: expired,
            duration: match expired {
                TimerKind::SyncReceipt => self.profile.sync_receipt_timeout(self.sync_interval),
                _ => self.profile.announce_receipt_timeout(self.announce_interval),
            }
            .to_core_duration(),
        };

        if self.is_master() {
            return actions![rearm];
        }

        log::info!(
            "port {}: {} timeout expired, becoming master",
            self.port_identity.port_number,
            match expired {
                TimerKind::SyncReceipt => "sync receipt",
                _ => "announce receipt",
            }
        );

        let mut list: ArrayVec<PortAction<'_>, 6> = ArrayVec::new();
        list.push(rearm);
        for action in self.promote_self_to_master() {
            list.push(action);
        }
        PortActionIterator::from(list)
    }

    /// Fill the grandmaster fields with our own clock and start
    /// distributing time
    pub(super) fn promote_self_to_master(&mut self) -> PortActionIterator<'_> {
        {
            let mut shared = self.instance_state.borrow_mut();
            shared.grandmaster_ds = GrandmasterDs::claimed_by_self(&shared.default_ds);
            if let Some(record) = shared.record_for(self.ifindex) {
                record.erbest = None;
            }
        }

        self.set_forced_port_state(PortState::Master);

        if self.profile.announce_enabled() {
            actions![
                PortAction::ResetTimer {
                    kind: TimerKind::Sync,
                    duration: BOOTSTRAP_INTERVAL,
                },
                PortAction::ResetTimer {
                    kind: TimerKind::Announce,
                    duration: BOOTSTRAP_INTERVAL,
                }
            ]
        } else {
            actions![PortAction::ResetTimer {
                kind: TimerKind::Sync,
                duration: BOOTSTRAP_INTERVAL,
            }]
        }
    }

    /// The debounced election trigger fired: run the state decision across
    /// all ports of the instance
    pub fn handle_state_change_timer(&mut self) -> PortActionIterator<'_> {
        if !self.profile.runs_bmca() {
            log::debug!("state change event ignored: BMCA disabled by profile");
            return actions![];
        }

        {
            let mut shared = self.instance_state.borrow_mut();
            if shared.default_ds.slave_only() {
                return actions![];
            }

            let Some(decision) = run_state_decision(
                &shared.default_ds,
                shared.last_ebest_identity,
                &shared.port_records,
            ) else {
                return actions![];
            };

            if decision.changed_external_master {
                log::info!(
                    "grandmaster changed to {}",
                    decision.grandmaster.grandmaster_identity()
                );
                shared.servo.arm_setpoint();
                shared.master_local_rate.reset();
            }

            shared.last_ebest_identity = Some(decision.ebest_identity);
            let slave_port = decision.slave_port;
            shared.grandmaster_ds = decision.grandmaster;
            for record in shared.port_records.iter_mut() {
                if record.enabled {
                    record.recommended_role = Some(if slave_port == Some(record.ifindex) {
                        RecommendedRole::Slave
                    } else {
                        RecommendedRole::Master
                    });
                }
            }
            shared.bmca_revision = shared.bmca_revision.wrapping_add(1);
        }

        self.apply_recommended_role()
    }

    /// Take the role the last election recommended for this port, if any
    pub fn apply_recommended_role(&mut self) -> PortActionIterator<'_> {
        let role = self
            .instance_state
            .borrow_mut()
            .record_for(self.ifindex)
            .and_then(|record| record.recommended_role.take());

        match role {
            Some(RecommendedRole::Master) if !self.is_master() => self.become_master(true),
            Some(RecommendedRole::Slave) if !self.is_steering() => self.become_slave(true),
            _ => actions![],
        }
    }

    /// Move to the master role and start the transmit cadences
    pub(super) fn become_master(&mut self, restart_announce: bool) -> PortActionIterator<'_> {
        self.set_forced_port_state(PortState::Master);

        let mut list: ArrayVec<PortAction<'_>, 6> = ArrayVec::new();
        list.push(PortAction::StopTimer {
            kind: TimerKind::AnnounceReceipt,
        });
        list.push(PortAction::StopTimer {
            kind: TimerKind::SyncReceipt,
        });
        list.push(PortAction::ResetTimer {
            kind: TimerKind::Sync,
            duration: BOOTSTRAP_INTERVAL,
        });
        if restart_announce && self.profile.announce_enabled() {
            list.push(PortAction::ResetTimer {
                kind: TimerKind::Announce,
                duration: BOOTSTRAP_INTERVAL,
            });
        }
        PortActionIterator::from(list)
    }

    /// Move to the slave role and wait for the master's time
    pub(super) fn become_slave(&mut self, restart_syntonization: bool) -> PortActionIterator<'_> {
        self.set_forced_port_state(PortState::Slave(SlaveState::default()));

        if restart_syntonization {
            let mut shared = self.instance_state.borrow_mut();
            shared.servo.arm_setpoint();
            shared.master_local_rate.reset();
        }

        actions![
            PortAction::StopTimer {
                kind: TimerKind::Announce,
            },
            PortAction::StopTimer {
                kind: TimerKind::Sync,
            },
            PortAction::ResetTimer {
                kind: TimerKind::AnnounceReceipt,
                duration: self
                    .profile
                    .announce_receipt_timeout(self.announce_interval)
                    .to_core_duration(),
            },
            PortAction::ResetTimer {
                kind: TimerKind::SyncReceipt,
                duration: self
                    .profile
                    .sync_receipt_timeout(self.sync_interval)
                    .to_core_duration(),
            }
        ]
    }
}
