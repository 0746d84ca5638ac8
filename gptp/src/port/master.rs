//! Master-side time distribution: syncs, their follow-ups, and announces.

use super::{actions::TimestampContextInner, Port, PortAction, PortActionIterator, TimerKind};
use crate::{
    clock::Clock,
    datastructures::{
        common::{Tlv, TlvSetBuilder, TlvType},
        datasets::MAX_PATH_TRACE,
        messages::{FollowUpTlv, Message, MAX_DATA_LEN},
    },
    port::TimestampContext,
    time::Timestamp,
};

impl<'a, C: Clock> Port<'a, C> {
    /// The sync interval elapsed: emit a sync if we are a capable master
    pub fn handle_sync_timer(&mut self) -> PortActionIterator<'_> {
        if !self.is_master() {
            return actions![];
        }

        let reset = PortAction::ResetTimer {
            kind: TimerKind::Sync,
            duration: self.sync_interval.as_core_duration(),
        };

        // Keep the local-to-system ratio fresh for IPC consumers even when
        // nothing is transmitted
        let _ = self
            .instance_state
            .borrow_mut()
            .local_system_rate
            .observe(self.clock.now(), self.clock.system_now());

        if !self.as_capable {
            return actions![reset];
        }

        log::trace!("sending sync message");
        let seq_id = self.sync_seq_ids.generate();
        let message = {
            let state = self.instance_state.borrow();
            Message::sync(
                &state.default_ds,
                self.port_identity,
                seq_id,
                self.sync_interval,
            )
        };

        let packet_length = match message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("could not serialize sync: {:?}", error);
                return actions![reset];
            }
        };

        actions![
            reset,
            PortAction::SendEvent {
                context: TimestampContext {
                    inner: TimestampContextInner::Sync { id: seq_id },
                },
                data: &self.packet_buffer[..packet_length],
                link_local: false,
            }
        ]
    }

    /// The sync left the wire; follow up with its precise origin
    pub(super) fn handle_sync_timestamp(
        &mut self,
        id: u16,
        timestamp: Timestamp,
    ) -> PortActionIterator<'_> {
        if !self.is_master() {
            return actions![];
        }

        let (message, follow_up_tlv) = {
            let state = self.instance_state.borrow();

            // Relaying an external grandmaster carries its accumulated rate
            // offset and time base; as grandmaster both are ours and zero
            let tracking_external = state.grandmaster_ds.grandmaster_identity()
                != state.default_ds.clock_identity;
            let follow_up_tlv = if tracking_external {
                FollowUpTlv {
                    cumulative_scaled_rate_offset: ((state.last_ml_freq_ratio - 1.0)
                        * (1u64 << 41) as f64)
                        as i32,
                    gm_time_base_indicator: state.gm_time_base_indicator,
                    ..Default::default()
                }
            } else {
                FollowUpTlv::default()
            };

            (
                Message::follow_up(
                    &state.default_ds,
                    self.port_identity,
                    id,
                    self.sync_interval,
                    timestamp.time(),
                ),
                follow_up_tlv,
            )
        };

        let mut tlv_value = [0; FollowUpTlv::VALUE_LEN];
        let mut tlv_backing = [0; FollowUpTlv::VALUE_LEN + 4];
        let mut builder = TlvSetBuilder::new(&mut tlv_backing);
        if let Err(error) = builder.add(follow_up_tlv.as_tlv(&mut tlv_value)) {
            log::error!("could not build follow-up tlv: {:?}", error);
            return actions![];
        }
        let mut message = message;
        message.suffix = builder.build();

        let packet_length = match message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("could not serialize follow-up: {:?}", error);
                return actions![];
            }
        };

        actions![PortAction::SendGeneral {
            data: &self.packet_buffer[..packet_length],
            link_local: false,
        }]
    }

    /// The announce interval elapsed: advertise the grandmaster we track
    pub fn handle_announce_timer(&mut self) -> PortActionIterator<'_> {
        if !self.is_master() {
            return actions![];
        }

        let reset = PortAction::ResetTimer {
            kind: TimerKind::Announce,
            duration: self.announce_interval.as_core_duration(),
        };

        if !self.profile.sends_announce(self.as_capable) {
            return actions![reset];
        }

        log::trace!("sending announce message");

        let mut trace_value = [0u8; (MAX_PATH_TRACE + 1) * 8];
        let mut tlv_backing = [0u8; (MAX_PATH_TRACE + 1) * 8 + 4];
        let mut builder = TlvSetBuilder::new(&mut tlv_backing);

        let mut message = {
            let state = self.instance_state.borrow();
            let message = Message::announce(
                &state.default_ds,
                &state.grandmaster_ds,
                self.port_identity,
                self.announce_seq_ids.generate(),
                self.announce_interval,
            );

            // The path trace we forward is the grandmaster's plus ourselves
            let path = &state.grandmaster_ds.path_trace;
            if path.len() < MAX_PATH_TRACE + 1 {
                let mut offset = 0;
                for identity in path.iter() {
                    trace_value[offset..offset + 8].copy_from_slice(&identity.0);
                    offset += 8;
                }
                trace_value[offset..offset + 8]
                    .copy_from_slice(&state.default_ds.clock_identity.0);
                offset += 8;

                // Fits by construction of the backing buffers
                builder
                    .add(Tlv {
                        tlv_type: TlvType::PathTrace,
                        value: &trace_value[..offset],
                    })
                    .unwrap();
            }

            message
        };
        message.suffix = builder.build();

        debug_assert!(message.wire_size() <= MAX_DATA_LEN);
        let packet_length = match message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("could not serialize announce: {:?}", error);
                return actions![reset];
            }
        };

        actions![
            reset,
            PortAction::SendGeneral {
                data: &self.packet_buffer[..packet_length],
                link_local: false,
            }
        ]
    }
}
