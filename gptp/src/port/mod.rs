//! Abstraction of a network [`Port`] of a device.
//!
//! See [`Port`] for a detailed description.

use atomic_refcell::AtomicRefCell;

pub use actions::{PortAction, PortActionIterator, TimerKind, TimestampContext};
pub use state::PortState;

pub use crate::datastructures::messages::MAX_DATA_LEN;
use crate::{
    clock::Clock,
    config::{Profile, ProfileKind},
    datastructures::{
        common::{ClockIdentity, PortIdentity},
        messages::{
            Message, MessageBody, MessageIntervalRequestTlv, SignalingMessage,
            INTERVAL_DO_NOT_CHANGE, INTERVAL_SET_INITIAL,
        },
        WireFormatError,
    },
    port::{actions::TimestampContextInner, pdelay::PDelayState},
    ptp_instance::PtpInstanceState,
    time::{Interval, Timestamp},
};

// Needs to be here because of use rules
macro_rules! actions {
    [] => {
        {
            crate::port::PortActionIterator::from(::arrayvec::ArrayVec::new())
        }
    };
    [$($action:expr),+ $(,)?] => {
        {
            let mut list = ::arrayvec::ArrayVec::new();
            $(list.push($action);)+
            crate::port::PortActionIterator::from(list)
        }
    };
}

mod actions;
mod bmca;
mod master;
mod pdelay;
mod sequence_id;
mod slave;
mod state;

use sequence_id::SequenceIdGenerator;

/// Per-port message and error counters, in the spirit of the 802.1AS port
/// statistics group
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortStats {
    pub rx_sync: u32,
    pub rx_follow_up: u32,
    pub rx_announce: u32,
    pub rx_pdelay_req: u32,
    pub rx_pdelay_resp: u32,
    pub rx_pdelay_resp_follow_up: u32,
    pub rx_signaling: u32,
    /// Frames that failed to decode or were otherwise dropped
    pub rx_ptp_discards: u32,
    /// Frames carrying a transportSpecific nibble other than gPTP's
    pub rx_unsupported_transport: u32,
    /// Correlation failures: follow-ups or responses with an unexpected
    /// sequence id or source
    pub wrong_sequence_ids: u32,
    pub announce_receipt_timeouts: u32,
    pub sync_receipt_timeouts: u32,
}

/// A single port of a [`PtpInstance`](`crate::PtpInstance`).
///
/// One of these exists per network interface taking part in the domain. The
/// port is sans-io: the caller feeds it received packets
/// ([`handle_event_receive`](`Port::handle_event_receive`),
/// [`handle_general_receive`](`Port::handle_general_receive`)), transmit
/// timestamps ([`handle_send_timestamp`](`Port::handle_send_timestamp`)),
/// link and timer events, and performs the [`PortAction`]s each call
/// returns. At most one timer per [`TimerKind`] is ever pending; a
/// [`PortAction::ResetTimer`] replaces the previous deadline.
#[derive(Debug)]
pub struct Port<'a, C> {
    instance_state: &'a AtomicRefCell<PtpInstanceState>,
    profile: Profile,
    clock: C,
    port_identity: PortIdentity,
    ifindex: u32,
    port_state: PortState,
    link_up: bool,

    announce_seq_ids: SequenceIdGenerator,
    sync_seq_ids: SequenceIdGenerator,
    signal_seq_ids: SequenceIdGenerator,
    pdelay_seq_ids: SequenceIdGenerator,

    pub(crate) as_capable: bool,
    pub(crate) pdelay: PDelayState,
    sync_count: u32,
    last_gm_time_base_indicator: Option<u16>,

    // Current transmit cadence; starts at the profile values, retuned by
    // signaling messages
    sync_interval: Interval,
    announce_interval: Interval,
    pdelay_interval: Interval,

    stats: PortStats,
    packet_buffer: [u8; MAX_DATA_LEN],
}

impl<'a, C> Port<'a, C> {
    pub(crate) fn new(
        instance_state: &'a AtomicRefCell<PtpInstanceState>,
        ifindex: u32,
        profile: Profile,
        clock: C,
    ) -> Self {
        let clock_identity = instance_state.borrow().default_ds.clock_identity;

        Port {
            instance_state,
            as_capable: profile.initial_as_capable,
            sync_interval: profile.sync_interval(),
            announce_interval: profile.announce_interval(),
            pdelay_interval: profile.pdelay_interval(),
            profile,
            clock,
            port_identity: PortIdentity {
                clock_identity,
                port_number: ifindex as u16,
            },
            ifindex,
            port_state: PortState::Initializing,
            link_up: false,
            announce_seq_ids: SequenceIdGenerator::new(),
            sync_seq_ids: SequenceIdGenerator::new(),
            signal_seq_ids: SequenceIdGenerator::new(),
            pdelay_seq_ids: SequenceIdGenerator::new(),
            pdelay: PDelayState::default(),
            sync_count: 0,
            last_gm_time_base_indicator: None,
            stats: PortStats::default(),
            packet_buffer: [0; MAX_DATA_LEN],
        }
    }

    /// Whether this port is currently disciplining the local clock
    pub fn is_steering(&self) -> bool {
        matches!(self.port_state, PortState::Slave(_))
    }

    /// Whether this port is in the master state
    pub fn is_master(&self) -> bool {
        matches!(self.port_state, PortState::Master)
    }

    pub fn state(&self) -> &PortState {
        &self.port_state
    }

    pub fn identity(&self) -> PortIdentity {
        self.port_identity
    }

    pub fn interface_index(&self) -> u32 {
        self.ifindex
    }

    pub fn as_capable(&self) -> bool {
        self.as_capable
    }

    pub fn sync_count(&self) -> u32 {
        self.sync_count
    }

    pub fn pdelay_count(&self) -> u32 {
        self.pdelay.count
    }

    pub fn stats(&self) -> PortStats {
        self.stats
    }

    fn set_forced_port_state(&mut self, state: PortState) {
        log::info!(
            "new state for port {}: {} -> {}",
            self.port_identity.port_number,
            self.port_state,
            state
        );
        self.port_state = state;
        let enabled = self.port_state.is_enabled();
        if let Some(record) = self.instance_state.borrow_mut().record_for(self.ifindex) {
            record.enabled = enabled;
        }
    }
}

impl<'a, C: Clock> Port<'a, C> {
    /// Bring the port out of `Initializing`.
    ///
    /// Slave-only clocks and profiles forcing slave mode go straight to
    /// `Slave`; everything else listens for announces first.
    pub fn handle_powerup(&mut self) -> PortActionIterator<'_> {
        if self.port_state != PortState::Initializing {
            return actions![];
        }

        let slave_only = self.instance_state.borrow().default_ds.slave_only();
        if slave_only || self.profile.force_slave_mode {
            self.become_slave(false)
        } else {
            self.set_forced_port_state(PortState::Listening);
            actions![PortAction::ResetTimer {
                kind: TimerKind::AnnounceReceipt,
                duration: self
                    .profile
                    .announce_receipt_timeout(self.announce_interval)
                    .to_core_duration(),
            }]
        }
    }

    /// The interface came up
    pub fn handle_link_up(&mut self) -> PortActionIterator<'_> {
        self.link_up = true;
        self.pdelay.reset_on_link_event();
        self.as_capable = self.profile.as_capable_on_link_up;
        if self.as_capable {
            log::info!(
                "port {} asCapable on link up",
                self.port_identity.port_number
            );
        }

        if matches!(self.port_state, PortState::Faulty) {
            self.set_forced_port_state(PortState::Listening);
        }

        let mut list = arrayvec::ArrayVec::new();
        if self.profile.start_pdelay_on_link_up {
            list.push(PortAction::ResetTimer {
                kind: TimerKind::PDelay,
                duration: core::time::Duration::ZERO,
            });
        }
        if let Some(delay) = self
            .profile
            .sync_rate_interval(!self.profile.force_slave_mode)
        {
            list.push(PortAction::ResetTimer {
                kind: TimerKind::SyncRate,
                duration: delay.to_core_duration(),
            });
        }

        let slave_only = self.instance_state.borrow().default_ds.slave_only();
        let role_actions = if slave_only || matches!(self.port_state, PortState::Slave(_)) {
            self.become_slave(true)
        } else if matches!(self.port_state, PortState::Master) {
            self.become_master(true)
        } else {
            self.set_forced_port_state(PortState::Listening);
            actions![PortAction::ResetTimer {
                kind: TimerKind::AnnounceReceipt,
                duration: self
                    .profile
                    .announce_receipt_timeout(self.announce_interval)
                    .to_core_duration(),
            }]
        };
        for action in role_actions {
            list.push(action);
        }

        PortActionIterator::from(list)
    }

    /// The interface went down
    pub fn handle_link_down(&mut self) -> PortActionIterator<'_> {
        self.link_up = false;
        self.pdelay.exchange = None;
        if !self.profile.as_capable_on_link_down {
            self.as_capable = false;
        }

        actions![
            PortAction::StopTimer {
                kind: TimerKind::PDelay
            },
            PortAction::StopTimer {
                kind: TimerKind::PDelayResponseReceipt
            },
            PortAction::StopTimer {
                kind: TimerKind::Sync
            },
            PortAction::StopTimer {
                kind: TimerKind::Announce
            }
        ]
    }

    /// A fatal I/O error was reported for this port
    pub fn handle_fault(&mut self) -> PortActionIterator<'_> {
        log::error!("port {} faulted", self.port_identity.port_number);
        self.set_forced_port_state(PortState::Faulty);
        if self.profile.kind != ProfileKind::Automotive {
            self.as_capable = false;
        }

        actions![
            PortAction::StopTimer {
                kind: TimerKind::Announce
            },
            PortAction::StopTimer {
                kind: TimerKind::Sync
            },
            PortAction::StopTimer {
                kind: TimerKind::PDelay
            },
            PortAction::StopTimer {
                kind: TimerKind::PDelayResponseReceipt
            }
        ]
    }

    /// Handle a message received on the event (timestamped) path
    pub fn handle_event_receive<'b>(
        &'b mut self,
        data: &'b [u8],
        timestamp: Timestamp,
    ) -> PortActionIterator<'b> {
        let message = match self.decode(data) {
            Some(message) => message,
            None => return actions![],
        };

        if !self.accepts_messages() {
            return actions![];
        }

        let header = *message.header();
        match message.body {
            MessageBody::Sync(sync) => {
                self.stats.rx_sync += 1;
                self.handle_sync(header, sync, timestamp)
            }
            MessageBody::PDelayReq(_) => {
                self.stats.rx_pdelay_req += 1;
                self.handle_pdelay_req(header, timestamp)
            }
            MessageBody::PDelayResp(resp) => {
                self.stats.rx_pdelay_resp += 1;
                self.handle_pdelay_resp(header, resp, timestamp)
            }
            _ => {
                // General message on the event path; not fatal, process it
                self.handle_general_message(message)
            }
        }
    }

    /// Handle a message received on the general (untimestamped) path
    pub fn handle_general_receive<'b>(&'b mut self, data: &'b [u8]) -> PortActionIterator<'b> {
        let message = match self.decode(data) {
            Some(message) => message,
            None => return actions![],
        };

        if !self.accepts_messages() {
            return actions![];
        }

        self.handle_general_message(message)
    }

    fn handle_general_message<'b>(&'b mut self, message: Message<'b>) -> PortActionIterator<'b> {
        let header = *message.header();
        match message.body {
            MessageBody::FollowUp(follow_up) => {
                self.stats.rx_follow_up += 1;
                let tlv = crate::datastructures::messages::FollowUpTlv::from_tlv_set(
                    &message.suffix,
                );
                self.handle_follow_up(header, follow_up, tlv)
            }
            MessageBody::PDelayRespFollowUp(follow_up) => {
                self.stats.rx_pdelay_resp_follow_up += 1;
                self.handle_pdelay_resp_follow_up(header, follow_up)
            }
            MessageBody::Announce(announce) => {
                self.stats.rx_announce += 1;
                let path_trace = message.suffix.find(
                    crate::datastructures::common::TlvType::PathTrace,
                );
                self.handle_announce(&announce, path_trace)
            }
            MessageBody::Signaling(signaling) => {
                self.stats.rx_signaling += 1;
                let request = MessageIntervalRequestTlv::from_tlv_set(&message.suffix);
                self.handle_signaling(signaling, request)
            }
            MessageBody::Sync(_) | MessageBody::PDelayReq(_) | MessageBody::PDelayResp(_) => {
                // Event message without a timestamp is useless
                log::warn!("Ignoring event message on general path");
                self.stats.rx_ptp_discards += 1;
                actions![]
            }
        }
    }

    /// Inform the port about a transmit timestamp being available.
    ///
    /// `context` is the handle from the [`PortAction::SendEvent`] that
    /// caused the send.
    pub fn handle_send_timestamp(
        &mut self,
        context: TimestampContext,
        timestamp: Timestamp,
    ) -> PortActionIterator<'_> {
        match context.inner {
            TimestampContextInner::Sync { id } => self.handle_sync_timestamp(id, timestamp),
            TimestampContextInner::PDelayReq { id } => {
                self.handle_pdelay_request_timestamp(id, timestamp)
            }
            TimestampContextInner::PDelayResp {
                id,
                requestor_identity,
            } => self.handle_pdelay_response_timestamp(id, requestor_identity, timestamp),
        }
    }

    /// A peer requested different transmit cadences via a signaling message
    fn handle_signaling(
        &mut self,
        message: SignalingMessage,
        request: Option<MessageIntervalRequestTlv>,
    ) -> PortActionIterator<'_> {
        let wildcard = ClockIdentity([0xff; 8]);
        if message.target_port_identity != self.port_identity
            && message.target_port_identity.clock_identity != wildcard
        {
            return actions![];
        }

        let Some(request) = request else {
            return actions![];
        };

        self.pdelay_interval = requested_interval(
            request.link_delay_interval,
            self.pdelay_interval,
            self.profile.pdelay_interval(),
        );
        self.sync_interval = requested_interval(
            request.time_sync_interval,
            self.sync_interval,
            self.profile.sync_interval(),
        );
        self.announce_interval = requested_interval(
            request.announce_interval,
            self.announce_interval,
            self.profile.announce_interval(),
        );

        log::info!(
            "port {} intervals now sync={} announce={} pdelay={} (signaled)",
            self.port_identity.port_number,
            self.sync_interval.as_log_2(),
            self.announce_interval.as_log_2(),
            self.pdelay_interval.as_log_2(),
        );

        let mut list = arrayvec::ArrayVec::new();
        if !self.pdelay.halted && self.link_up {
            list.push(PortAction::ResetTimer {
                kind: TimerKind::PDelay,
                duration: self.pdelay_interval.as_core_duration(),
            });
        }
        if self.is_master() {
            list.push(PortAction::ResetTimer {
                kind: TimerKind::Sync,
                duration: self.sync_interval.as_core_duration(),
            });
            list.push(PortAction::ResetTimer {
                kind: TimerKind::Announce,
                duration: self.announce_interval.as_core_duration(),
            });
        }
        PortActionIterator::from(list)
    }

    /// Automotive cadence management: switch to the operational intervals
    /// and tell the peer about it
    pub fn handle_sync_rate_timer(&mut self) -> PortActionIterator<'_> {
        if self.profile.kind != ProfileKind::Automotive {
            return actions![];
        }

        let operational_sync = Interval::from_log_2(self.profile.operational_sync_interval_log);
        let operational_pdelay =
            Interval::from_log_2(self.profile.operational_pdelay_interval_log);

        let mut changed = false;
        if self.sync_interval != operational_sync {
            self.sync_interval = operational_sync;
            changed = true;
        }
        if self.pdelay_interval != operational_pdelay {
            self.pdelay_interval = operational_pdelay;
            changed = true;
        }

        if !changed || !self.profile.force_slave_mode {
            return actions![];
        }

        // Ask the master to follow us to the operational cadence
        let message = {
            let state = self.instance_state.borrow();
            Message::signaling(
                &state.default_ds,
                self.port_identity,
                PortIdentity {
                    clock_identity: ClockIdentity([0xff; 8]),
                    port_number: 0xffff,
                },
                self.signal_seq_ids.generate(),
            )
        };

        let mut value = [0; MessageIntervalRequestTlv::VALUE_LEN];
        let mut tlv_backing = [0; 32];
        let request = MessageIntervalRequestTlv {
            link_delay_interval: INTERVAL_DO_NOT_CHANGE,
            time_sync_interval: self.sync_interval.as_log_2(),
            announce_interval: INTERVAL_DO_NOT_CHANGE,
        };
        let mut builder = crate::datastructures::common::TlvSetBuilder::new(&mut tlv_backing);
        if builder.add(request.as_tlv(&mut value)).is_err() {
            return actions![];
        }
        let mut message = message;
        message.suffix = builder.build();

        let packet_length = match message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("could not serialize signaling message: {:?}", error);
                return actions![];
            }
        };

        actions![
            PortAction::ResetTimer {
                kind: TimerKind::SyncReceipt,
                duration: self
                    .profile
                    .sync_receipt_timeout(self.sync_interval)
                    .to_core_duration(),
            },
            PortAction::SendGeneral {
                data: &self.packet_buffer[..packet_length],
                link_local: false,
            }
        ]
    }

    fn decode<'b>(&mut self, data: &'b [u8]) -> Option<Message<'b>> {
        let message = match Message::deserialize(data) {
            Ok(message) => message,
            Err(WireFormatError::UnsupportedTransport) => {
                self.stats.rx_unsupported_transport += 1;
                log::trace!("ignoring non-gPTP frame");
                return None;
            }
            Err(error) => {
                self.stats.rx_ptp_discards += 1;
                log::debug!("could not parse packet: {:?}", error);
                return None;
            }
        };

        // Only process messages from our own domain
        let domain = self.instance_state.borrow().default_ds.domain_number;
        if message.header().domain_number != domain {
            return None;
        }

        Some(message)
    }

    fn accepts_messages(&self) -> bool {
        match self.port_state {
            PortState::Disabled | PortState::Initializing => false,
            // Recovery is driven by link events, not incoming traffic
            PortState::Faulty => false,
            _ => true,
        }
    }

    /// Snapshot of this port's synchronization state for IPC consumers
    pub fn time_sync_report(&self) -> crate::observability::TimeSyncReport {
        let shared = self.instance_state.borrow();
        let local_time = self.clock.now();
        let system_time = self.clock.system_now();

        crate::observability::TimeSyncReport {
            ml_phase_offset_ns: shared.last_ml_offset.nanos_rounded(),
            ls_phase_offset_ns: (local_time - system_time).nanos_rounded(),
            ml_freq_ratio: shared.last_ml_freq_ratio,
            ls_freq_ratio: shared.local_system_rate.ratio(),
            local_time_ns: local_time.nanos_rounded(),
            sync_count: self.sync_count,
            pdelay_count: self.pdelay.count,
            port_state: self.port_state.as_u8(),
            as_capable: self.as_capable,
            grandmaster_id: shared.grandmaster_ds.grandmaster_identity().0,
            domain_number: shared.default_ds.domain_number,
            clock_identity: shared.default_ds.clock_identity.0,
            priority1: shared.default_ds.priority_1,
            clock_class: shared.default_ds.clock_quality.clock_class,
            offset_scaled_log_variance: shared.default_ds.clock_quality.offset_scaled_log_variance,
            clock_accuracy: shared.default_ds.clock_quality.clock_accuracy,
            priority2: shared.default_ds.priority_2,
            log_sync_interval: self.sync_interval.as_log_2(),
            log_announce_interval: self.announce_interval.as_log_2(),
            log_pdelay_interval: self.pdelay_interval.as_log_2(),
            port_number: self.port_identity.port_number,
        }
    }
}

/// Interpretation of a signaled log interval per *802.1AS-2020 10.6.4.3*
fn requested_interval(requested: i8, current: Interval, initial: Interval) -> Interval {
    match requested {
        INTERVAL_DO_NOT_CHANGE => current,
        INTERVAL_SET_INITIAL => initial,
        log => Interval::from_log_2(log),
    }
}
