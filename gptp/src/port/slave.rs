//! Slave-side time reception: correlate syncs with their follow-ups and
//! turn each pair into exactly one servo sample.

use super::{Port, PortAction, PortActionIterator, TimerKind};
use crate::{
    clock::Clock,
    datastructures::messages::{FollowUpMessage, FollowUpTlv, Header, SyncMessage},
    port::state::{PortState, RetainedSync},
    servo::{RateEstimatorError, ServoUpdate},
    time::{Duration, Time, Timestamp},
};

/// Offset magnitude below which the port counts as converged to its master
const CONVERGENCE_TARGET_NS: i64 = 1_000;

impl<'a, C: Clock> Port<'a, C> {
    /// A sync arrived; retain it until its follow-up shows up.
    ///
    /// Only two-step operation is supported, the origin timestamp inside
    /// the sync itself is ignored.
    pub(super) fn handle_sync(
        &mut self,
        header: Header,
        _message: SyncMessage,
        recv_time: Timestamp,
    ) -> PortActionIterator<'_> {
        let process_regardless = self.profile.process_sync_regardless_as_capable;
        let as_capable = self.as_capable;

        match &mut self.port_state {
            PortState::Slave(state) => {
                if !as_capable && !process_regardless {
                    log::debug!("ignoring sync, port is not asCapable");
                    return actions![];
                }

                log::trace!("received sync {}", header.sequence_id);
                // Only the newest sync is interesting; an unanswered older
                // one is forgotten here
                state.retained_sync = Some(RetainedSync {
                    sequence_id: header.sequence_id,
                    source_port_identity: header.source_port_identity,
                    recv_time,
                });
                actions![]
            }
            _ => actions![],
        }
    }

    /// The follow-up completes the retained sync into a measurement
    pub(super) fn handle_follow_up(
        &mut self,
        header: Header,
        message: FollowUpMessage,
        tlv: Option<FollowUpTlv>,
    ) -> PortActionIterator<'_> {
        let sync_receipt_reset = PortAction::ResetTimer {
            kind: TimerKind::SyncReceipt,
            duration: self
                .profile
                .sync_receipt_timeout(self.sync_interval)
                .to_core_duration(),
        };

        let PortState::Slave(state) = &mut self.port_state else {
            return actions![];
        };

        log::trace!("received follow-up {}", header.sequence_id);

        // Exactly one sync/follow-up pair produces exactly one sample
        let matched = state.retained_sync.is_some_and(|sync| {
            sync.sequence_id == header.sequence_id
                && sync.source_port_identity == header.source_port_identity
        });
        if !matched {
            self.stats.wrong_sequence_ids += 1;
            let PortState::Slave(state) = &mut self.port_state else {
                unreachable!()
            };
            state.wrong_correlation_run += 1;
            log::debug!(
                "follow-up without matching sync ({} in a row)",
                state.wrong_correlation_run
            );
            if state.wrong_correlation_run > self.profile.sync_receipt_thresh {
                log::warn!("lost track of the master's syncs, claiming grandmaster");
                return self.promote_self_to_master();
            }
            return actions![sync_receipt_reset];
        }

        let PortState::Slave(state) = &mut self.port_state else {
            unreachable!()
        };
        let sync = state.retained_sync.take().unwrap();
        state.wrong_correlation_run = 0;

        let Some(link_delay) = self.pdelay.link_delay else {
            log::debug!("received follow-up but there is no valid link delay");
            return actions![sync_receipt_reset];
        };

        let correction = header.correction_field;
        if correction.is_negative() && !self.profile.allows_negative_correction_field {
            log::warn!(
                "discarding follow-up with negative correction field {}",
                correction.nanos_rounded()
            );
            return actions![sync_receipt_reset];
        }

        let tlv = tlv.unwrap_or_default();
        let master_local_freq_ratio = tlv.rate_ratio() / self.pdelay.peer_rate();

        // Translate the master's transmit time to our ingress: propagation
        // at the master's rate plus the accumulated correction
        let precise_origin = Time::from(message.precise_origin_timestamp)
            + link_delay * master_local_freq_ratio
            + Duration::from(correction);

        let sync_arrival = sync.recv_time.time();
        let offset = sync_arrival - precise_origin;

        if let Some(last) = self.last_gm_time_base_indicator {
            if last != tlv.gm_time_base_indicator {
                log::warn!(
                    "sync discontinuity: grandmaster time base indicator {} -> {}",
                    last,
                    tlv.gm_time_base_indicator
                );
            }
        }
        self.last_gm_time_base_indicator = Some(tlv.gm_time_base_indicator);

        let update = {
            let mut shared = self.instance_state.borrow_mut();

            match shared.master_local_rate.observe(precise_origin, sync_arrival) {
                Err(RateEstimatorError::NegativeTimeJump) => {
                    log::debug!("master time went backwards, discarding sample");
                    return actions![sync_receipt_reset];
                }
                // The estimator keeps its previous ratio; the sample is
                // still usable for the servo
                Err(RateEstimatorError::OutOfRange) | Ok(_) => {}
            }

            shared.gm_time_base_indicator = tlv.gm_time_base_indicator;
            shared.last_ml_offset = offset;
            shared.last_ml_freq_ratio = master_local_freq_ratio;
            let _ = shared
                .local_system_rate
                .observe(self.clock.now(), self.clock.system_now());

            let update = shared
                .servo
                .sample(offset, master_local_freq_ratio, self.sync_interval);
            if matches!(update, ServoUpdate::Step { .. }) {
                shared.master_local_rate.reset();
            }
            update
        };

        self.sync_count += 1;
        self.observe_sync_compliance(sync_arrival, offset);

        match update {
            ServoUpdate::Step { phase_correction } => {
                log::info!("stepping clock by {}", phase_correction);
                if let Err(error) = self.clock.adjust_phase(phase_correction) {
                    log::error!("could not step the clock: {:?}", error);
                }
                // The step invalidated the in-flight exchange; measure the
                // link fresh
                self.pdelay.exchange = None;
                actions![
                    sync_receipt_reset,
                    PortAction::ResetTimer {
                        kind: TimerKind::PDelay,
                        duration: core::time::Duration::ZERO,
                    }
                ]
            }
            ServoUpdate::Rate { ppm } => {
                if let Err(error) = self.clock.adjust_rate(ppm) {
                    // Not fatal; the next sample may well succeed
                    log::error!("could not adjust clock rate: {:?}", error);
                }
                actions![sync_receipt_reset]
            }
        }
    }

    /// Soft compliance monitoring: warn when the profile's jitter or
    /// convergence targets are missed, never change behaviour
    fn observe_sync_compliance(&mut self, sync_arrival: Time, offset: Duration) {
        let sync_interval = self.sync_interval.as_duration();
        let max_jitter = self.profile.max_sync_jitter_ns;
        let max_convergence = self.profile.max_convergence_time_ms;

        let PortState::Slave(state) = &mut self.port_state else {
            return;
        };

        if max_jitter > 0 {
            if let Some(last) = state.last_sync_arrival {
                let jitter = ((sync_arrival - last) - sync_interval).abs();
                if jitter > Duration::from_nanos(max_jitter as i64) {
                    log::warn!(
                        "sync jitter {} exceeds the profile limit of {}ns",
                        jitter,
                        max_jitter
                    );
                }
            }
        }
        state.last_sync_arrival = Some(sync_arrival);

        if state.sync_start.is_none() {
            state.sync_start = Some(sync_arrival);
        }
        if !state.converged && offset.abs() < Duration::from_nanos(CONVERGENCE_TARGET_NS) {
            state.converged = true;
            if max_convergence > 0 {
                let elapsed = sync_arrival - state.sync_start.unwrap_or(sync_arrival);
                if elapsed > Duration::from_millis(max_convergence as i64) {
                    log::warn!(
                        "convergence took {}, profile allows {}ms",
                        elapsed,
                        max_convergence
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Profile,
        datastructures::common::{ClockIdentity, PortIdentity, TimeInterval},
        port::tests::{test_instance, test_port},
        port::state::SlaveState,
    };
    use fixed::types::I48F16;

    fn master_identity() -> PortIdentity {
        PortIdentity {
            clock_identity: ClockIdentity([0xaa; 8]),
            port_number: 1,
        }
    }

    fn make_slave<C>(port: &mut Port<C>) {
        port.port_state = PortState::Slave(SlaveState::default());
    }

    fn feed_pair<C: Clock>(
        port: &mut Port<C>,
        sequence_id: u16,
        origin_ns: u64,
        arrival_ns: u64,
        correction: TimeInterval,
    ) {
        port.handle_sync(
            Header {
                sequence_id,
                two_step_flag: true,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Timestamp::software(Time::from_nanos(arrival_ns)),
        )
        .count();

        port.handle_follow_up(
            Header {
                sequence_id,
                correction_field: correction,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(origin_ns).into(),
            },
            Some(FollowUpTlv::default()),
        )
        .count();
    }

    #[test]
    fn sync_follow_up_pair_drives_servo() {
        let instance = test_instance(&Profile::standard_8021as(), Some(100));
        let mut port = test_port(&instance, Profile::standard_8021as());
        make_slave(&mut port);
        port.as_capable = true;
        port.pdelay.link_delay = Some(Duration::from_nanos(25));

        // Local clock 1000ns ahead of master after accounting for the
        // 25ns propagation: first sample steps by the offset
        feed_pair(&mut port, 1, 1_000_000, 1_001_025, TimeInterval::default());

        assert_eq!(port.sync_count(), 1);
        assert_eq!(
            port.clock.phase_adjustments.as_slice(),
            &[Duration::from_nanos(-1000)]
        );

        // Second pair slews instead of stepping
        feed_pair(
            &mut port,
            2,
            1_001_000_000,
            1_001_000_000 + 1025 + 100,
            TimeInterval::default(),
        );
        assert_eq!(port.sync_count(), 2);
        assert_eq!(port.clock.rate_adjustments.len(), 1);
    }

    #[test]
    fn negative_correction_field_is_discarded() {
        let instance = test_instance(&Profile::standard_8021as(), Some(100));
        let mut port = test_port(&instance, Profile::standard_8021as());
        make_slave(&mut port);
        port.as_capable = true;
        port.pdelay.link_delay = Some(Duration::from_nanos(25));

        feed_pair(
            &mut port,
            1,
            1_000_000,
            1_001_025,
            TimeInterval(I48F16::from_num(-1000)),
        );

        assert_eq!(port.sync_count(), 0);
        assert!(port.clock.phase_adjustments.is_empty());
        assert!(port.clock.rate_adjustments.is_empty());
    }

    #[test]
    fn automotive_accepts_negative_correction() {
        let instance = test_instance(&Profile::automotive(), None);
        let mut port = test_port(&instance, Profile::automotive());
        make_slave(&mut port);
        port.pdelay.link_delay = Some(Duration::from_nanos(25));

        feed_pair(
            &mut port,
            1,
            1_000_000,
            1_001_025,
            TimeInterval(I48F16::from_num(-1000)),
        );

        assert_eq!(port.sync_count(), 1);
    }

    #[test]
    fn follow_up_without_link_delay_is_dropped() {
        let instance = test_instance(&Profile::standard_8021as(), Some(100));
        let mut port = test_port(&instance, Profile::standard_8021as());
        make_slave(&mut port);
        port.as_capable = true;

        feed_pair(&mut port, 1, 1_000_000, 1_001_025, TimeInterval::default());
        assert_eq!(port.sync_count(), 0);
    }

    #[test]
    fn uncorrelated_follow_up_is_ignored() {
        let instance = test_instance(&Profile::standard_8021as(), Some(100));
        let mut port = test_port(&instance, Profile::standard_8021as());
        make_slave(&mut port);
        port.as_capable = true;
        port.pdelay.link_delay = Some(Duration::from_nanos(25));

        port.handle_sync(
            Header {
                sequence_id: 15,
                two_step_flag: true,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Timestamp::software(Time::from_nanos(1_001_025)),
        )
        .count();

        // Wrong sequence id
        port.handle_follow_up(
            Header {
                sequence_id: 14,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(1_000_000).into(),
            },
            Some(FollowUpTlv::default()),
        )
        .count();
        assert_eq!(port.sync_count(), 0);
        assert_eq!(port.stats().wrong_sequence_ids, 1);

        // Matching one still works afterwards
        port.handle_follow_up(
            Header {
                sequence_id: 15,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(1_000_000).into(),
            },
            Some(FollowUpTlv::default()),
        )
        .count();
        assert_eq!(port.sync_count(), 1);
    }

    #[test]
    fn newer_sync_replaces_retained_sync() {
        let instance = test_instance(&Profile::standard_8021as(), Some(100));
        let mut port = test_port(&instance, Profile::standard_8021as());
        make_slave(&mut port);
        port.as_capable = true;
        port.pdelay.link_delay = Some(Duration::from_nanos(25));

        for sequence_id in [20, 21] {
            port.handle_sync(
                Header {
                    sequence_id,
                    two_step_flag: true,
                    source_port_identity: master_identity(),
                    ..Default::default()
                },
                SyncMessage {
                    origin_timestamp: Default::default(),
                },
                Timestamp::software(Time::from_nanos(1_001_025)),
            )
            .count();
        }

        // The follow-up for the replaced sync no longer correlates
        port.handle_follow_up(
            Header {
                sequence_id: 20,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(1_000_000).into(),
            },
            Some(FollowUpTlv::default()),
        )
        .count();
        assert_eq!(port.sync_count(), 0);

        port.handle_follow_up(
            Header {
                sequence_id: 21,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(1_000_000).into(),
            },
            Some(FollowUpTlv::default()),
        )
        .count();
        assert_eq!(port.sync_count(), 1);
    }

    #[test]
    fn time_base_change_is_a_discontinuity() {
        let instance = test_instance(&Profile::standard_8021as(), Some(100));
        let mut port = test_port(&instance, Profile::standard_8021as());
        make_slave(&mut port);
        port.as_capable = true;
        port.pdelay.link_delay = Some(Duration::from_nanos(25));

        feed_pair(&mut port, 1, 1_000_000, 1_001_025, TimeInterval::default());
        assert_eq!(port.last_gm_time_base_indicator, Some(0));

        port.handle_sync(
            Header {
                sequence_id: 2,
                two_step_flag: true,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            SyncMessage {
                origin_timestamp: Default::default(),
            },
            Timestamp::software(Time::from_nanos(2_001_025)),
        )
        .count();
        port.handle_follow_up(
            Header {
                sequence_id: 2,
                source_port_identity: master_identity(),
                ..Default::default()
            },
            FollowUpMessage {
                precise_origin_timestamp: Time::from_nanos(2_000_000).into(),
            },
            Some(FollowUpTlv {
                gm_time_base_indicator: 5,
                ..Default::default()
            }),
        )
        .count();

        assert_eq!(port.last_gm_time_base_indicator, Some(5));
    }
}
