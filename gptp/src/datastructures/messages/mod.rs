//! gPTP network messages

pub(crate) use announce::*;
pub(crate) use follow_up::*;
pub(crate) use header::*;
pub(crate) use p_delay_req::*;
pub(crate) use p_delay_resp::*;
pub(crate) use p_delay_resp_follow_up::*;
pub(crate) use signaling::*;
pub(crate) use sync::*;

use super::{
    common::{PortIdentity, TimeInterval, TlvSet},
    datasets::{DefaultDs, GrandmasterDs},
    WireFormatError,
};
use crate::time::{Interval, Time};

mod announce;
mod follow_up;
mod header;
mod p_delay_req;
mod p_delay_resp;
mod p_delay_resp_follow_up;
mod signaling;
mod sync;

/// Maximum length of a packet
///
/// This can be used to preallocate buffers that can always fit packets sent
/// by `gptp`.
pub const MAX_DATA_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0x0,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    PDelayRespFollowUp = 0xa,
    Announce = 0xb,
    Signaling = 0xc,
}

pub struct EnumConversionError;

impl TryFrom<u8> for MessageType {
    type Error = EnumConversionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;

        match value {
            0x0 => Ok(Sync),
            0x2 => Ok(PDelayReq),
            0x3 => Ok(PDelayResp),
            0x8 => Ok(FollowUp),
            0xa => Ok(PDelayRespFollowUp),
            0xb => Ok(Announce),
            0xc => Ok(Signaling),
            _ => Err(EnumConversionError),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message<'a> {
    pub(crate) header: Header,
    pub(crate) body: MessageBody,
    pub(crate) suffix: TlvSet<'a>,
}

impl Message<'_> {
    /// Whether the receive path must capture an ingress timestamp for this
    /// message
    pub(crate) fn is_event(&self) -> bool {
        use MessageBody::*;
        match self.body {
            Sync(_) | PDelayReq(_) | PDelayResp(_) => true,
            FollowUp(_) | PDelayRespFollowUp(_) | Announce(_) | Signaling(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MessageBody {
    Sync(SyncMessage),
    PDelayReq(PDelayReqMessage),
    PDelayResp(PDelayRespMessage),
    FollowUp(FollowUpMessage),
    PDelayRespFollowUp(PDelayRespFollowUpMessage),
    Announce(AnnounceMessage),
    Signaling(SignalingMessage),
}

impl MessageBody {
    fn wire_size(&self) -> usize {
        match &self {
            MessageBody::Sync(m) => m.content_size(),
            MessageBody::PDelayReq(m) => m.content_size(),
            MessageBody::PDelayResp(m) => m.content_size(),
            MessageBody::FollowUp(m) => m.content_size(),
            MessageBody::PDelayRespFollowUp(m) => m.content_size(),
            MessageBody::Announce(m) => m.content_size(),
            MessageBody::Signaling(m) => m.content_size(),
        }
    }

    fn content_type(&self) -> MessageType {
        match self {
            MessageBody::Sync(_) => MessageType::Sync,
            MessageBody::PDelayReq(_) => MessageType::PDelayReq,
            MessageBody::PDelayResp(_) => MessageType::PDelayResp,
            MessageBody::FollowUp(_) => MessageType::FollowUp,
            MessageBody::PDelayRespFollowUp(_) => MessageType::PDelayRespFollowUp,
            MessageBody::Announce(_) => MessageType::Announce,
            MessageBody::Signaling(_) => MessageType::Signaling,
        }
    }

    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<usize, WireFormatError> {
        match &self {
            MessageBody::Sync(m) => m.serialize_content(buffer)?,
            MessageBody::PDelayReq(m) => m.serialize_content(buffer)?,
            MessageBody::PDelayResp(m) => m.serialize_content(buffer)?,
            MessageBody::FollowUp(m) => m.serialize_content(buffer)?,
            MessageBody::PDelayRespFollowUp(m) => m.serialize_content(buffer)?,
            MessageBody::Announce(m) => m.serialize_content(buffer)?,
            MessageBody::Signaling(m) => m.serialize_content(buffer)?,
        }

        Ok(self.wire_size())
    }

    pub(crate) fn deserialize(
        message_type: MessageType,
        header: &Header,
        buffer: &[u8],
    ) -> Result<Self, WireFormatError> {
        let body = match message_type {
            MessageType::Sync => MessageBody::Sync(SyncMessage::deserialize_content(buffer)?),
            MessageType::PDelayReq => {
                MessageBody::PDelayReq(PDelayReqMessage::deserialize_content(buffer)?)
            }
            MessageType::PDelayResp => {
                MessageBody::PDelayResp(PDelayRespMessage::deserialize_content(buffer)?)
            }
            MessageType::FollowUp => {
                MessageBody::FollowUp(FollowUpMessage::deserialize_content(buffer)?)
            }
            MessageType::PDelayRespFollowUp => MessageBody::PDelayRespFollowUp(
                PDelayRespFollowUpMessage::deserialize_content(buffer)?,
            ),
            MessageType::Announce => {
                MessageBody::Announce(AnnounceMessage::deserialize_content(*header, buffer)?)
            }
            MessageType::Signaling => {
                MessageBody::Signaling(SignalingMessage::deserialize_content(buffer)?)
            }
        };

        Ok(body)
    }
}

fn base_header(default_ds: &DefaultDs, port_identity: PortIdentity, sequence_id: u16) -> Header {
    Header {
        domain_number: default_ds.domain_number,
        source_port_identity: port_identity,
        sequence_id,
        ..Default::default()
    }
}

impl Message<'_> {
    pub(crate) fn sync(
        default_ds: &DefaultDs,
        port_identity: PortIdentity,
        sequence_id: u16,
        sync_interval: Interval,
    ) -> Self {
        let header = Header {
            two_step_flag: true,
            log_message_interval: sync_interval.as_log_2(),
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::Sync(SyncMessage {
                origin_timestamp: Default::default(),
            }),
            suffix: TlvSet::default(),
        }
    }

    /// The follow-up information TLV must be appended to the suffix by the
    /// caller, it borrows from a caller-owned backing buffer.
    pub(crate) fn follow_up(
        default_ds: &DefaultDs,
        port_identity: PortIdentity,
        sequence_id: u16,
        sync_interval: Interval,
        timestamp: Time,
    ) -> Self {
        let header = Header {
            correction_field: timestamp.subnano(),
            log_message_interval: sync_interval.as_log_2(),
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: timestamp.into(),
            }),
            suffix: TlvSet::default(),
        }
    }

    /// The path trace TLV must be appended to the suffix by the caller.
    pub(crate) fn announce(
        default_ds: &DefaultDs,
        grandmaster: &GrandmasterDs,
        port_identity: PortIdentity,
        sequence_id: u16,
        announce_interval: Interval,
    ) -> Self {
        let header = Header {
            current_utc_offset_valid: false,
            log_message_interval: announce_interval.as_log_2(),
            ..base_header(default_ds, port_identity, sequence_id)
        };

        let system_identity = grandmaster.system_identity;
        let body = MessageBody::Announce(AnnounceMessage {
            header,
            origin_timestamp: Default::default(),
            current_utc_offset: grandmaster.current_utc_offset,
            grandmaster_priority_1: system_identity.priority_1(),
            grandmaster_clock_quality: system_identity.clock_quality(),
            grandmaster_priority_2: system_identity.priority_2(),
            grandmaster_identity: system_identity.clock_identity(),
            steps_removed: grandmaster.steps_removed,
            time_source: grandmaster.time_source,
        });

        Message {
            header,
            body,
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn pdelay_req(
        default_ds: &DefaultDs,
        port_identity: PortIdentity,
        sequence_id: u16,
    ) -> Self {
        Message {
            header: base_header(default_ds, port_identity, sequence_id),
            body: MessageBody::PDelayReq(PDelayReqMessage::default()),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn pdelay_resp(
        default_ds: &DefaultDs,
        port_identity: PortIdentity,
        request_header: Header,
        timestamp: Time,
    ) -> Self {
        let header = Header {
            two_step_flag: true,
            correction_field: TimeInterval(
                request_header.correction_field.0 + timestamp.subnano().0,
            ),
            ..base_header(default_ds, port_identity, request_header.sequence_id)
        };

        Message {
            header,
            body: MessageBody::PDelayResp(PDelayRespMessage {
                request_receive_timestamp: timestamp.into(),
                requesting_port_identity: request_header.source_port_identity,
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn pdelay_resp_follow_up(
        default_ds: &DefaultDs,
        port_identity: PortIdentity,
        requestor_identity: PortIdentity,
        sequence_id: u16,
        timestamp: Time,
    ) -> Self {
        Message {
            header: base_header(default_ds, port_identity, sequence_id),
            body: MessageBody::PDelayRespFollowUp(PDelayRespFollowUpMessage {
                response_origin_timestamp: timestamp.into(),
                requesting_port_identity: requestor_identity,
            }),
            suffix: TlvSet::default(),
        }
    }

    /// The message interval request TLV must be appended to the suffix by
    /// the caller.
    pub(crate) fn signaling(
        default_ds: &DefaultDs,
        port_identity: PortIdentity,
        target_port_identity: PortIdentity,
        sequence_id: u16,
    ) -> Self {
        Message {
            header: base_header(default_ds, port_identity, sequence_id),
            body: MessageBody::Signaling(SignalingMessage {
                target_port_identity,
            }),
            suffix: TlvSet::default(),
        }
    }
}

impl<'a> Message<'a> {
    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    /// The byte size on the wire of this message
    pub(crate) fn wire_size(&self) -> usize {
        self.header.wire_size() + self.body.wire_size() + self.suffix.wire_size()
    }

    /// Serializes the object into the PTP wire format.
    ///
    /// Returns the used buffer size that contains the message or an error.
    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<usize, WireFormatError> {
        if buffer.len() < self.wire_size() {
            return Err(WireFormatError::BufferTooShort);
        }

        let (header, rest) = buffer.split_at_mut(34);
        let (body, tlv) = rest.split_at_mut(self.body.wire_size());

        self.header.serialize_header(
            self.body.content_type(),
            self.body.wire_size() + self.suffix.wire_size(),
            header,
        )?;
        self.body.serialize(body)?;
        self.suffix.serialize(tlv)?;

        Ok(self.wire_size())
    }

    /// Deserializes a message from the PTP wire format.
    ///
    /// Returns the message or an error.
    pub(crate) fn deserialize(buffer: &'a [u8]) -> Result<Self, WireFormatError> {
        let header_data = Header::deserialize_header(buffer)?;

        if header_data.message_length < 34 {
            return Err(WireFormatError::Invalid);
        }

        // Ensure we have the entire message and ignore potential padding
        // Skip the header bytes and only keep the content
        let content_buffer = buffer
            .get(34..(header_data.message_length as usize))
            .ok_or(WireFormatError::BufferTooShort)?;

        let body = MessageBody::deserialize(
            header_data.message_type,
            &header_data.header,
            content_buffer,
        )?;

        let tlv_buffer = &content_buffer
            .get(body.wire_size()..)
            .ok_or(WireFormatError::BufferTooShort)?;
        let suffix = TlvSet::deserialize(tlv_buffer)?;

        Ok(Message {
            header: header_data.header,
            body,
            suffix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{InstanceConfig, Profile},
        datastructures::common::ClockIdentity,
    };

    fn default_ds() -> DefaultDs {
        DefaultDs::new(
            &InstanceConfig {
                clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
                priority_1: Some(100),
                priority_2: None,
                domain_number: 0,
            },
            &Profile::standard_8021as(),
        )
    }

    #[test]
    fn sync_message_round_trip() {
        let message = Message::sync(
            &default_ds(),
            PortIdentity {
                clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
                port_number: 1,
            },
            42,
            Interval::ONE_SECOND,
        );

        let mut buffer = [0; MAX_DATA_LEN];
        let len = message.serialize(&mut buffer).unwrap();
        assert_eq!(len, 44);

        let parsed = Message::deserialize(&buffer[..len]).unwrap();
        assert_eq!(parsed, message);
        assert!(parsed.is_event());
        assert!(parsed.header().two_step_flag);
    }

    #[test]
    fn announce_message_round_trip() {
        let default_ds = default_ds();
        let grandmaster = GrandmasterDs::claimed_by_self(&default_ds);
        let message = Message::announce(
            &default_ds,
            &grandmaster,
            PortIdentity {
                clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
                port_number: 1,
            },
            7,
            Interval::ONE_SECOND,
        );

        let mut buffer = [0; MAX_DATA_LEN];
        let len = message.serialize(&mut buffer).unwrap();

        let parsed = Message::deserialize(&buffer[..len]).unwrap();
        assert!(!parsed.is_event());
        let MessageBody::Announce(body) = parsed.body else {
            panic!("expected announce body");
        };
        assert_eq!(
            body.grandmaster_identity,
            ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert_eq!(body.grandmaster_priority_1, 100);
        assert_eq!(body.steps_removed, 0);
    }

    #[test]
    fn pdelay_resp_copies_request_context() {
        let request_header = Header {
            sequence_id: 5123,
            source_port_identity: PortIdentity {
                clock_identity: ClockIdentity([9; 8]),
                port_number: 83,
            },
            ..Default::default()
        };

        let message = Message::pdelay_resp(
            &default_ds(),
            PortIdentity::default(),
            request_header,
            Time::from_micros(200),
        );

        assert_eq!(message.header.sequence_id, 5123);
        let MessageBody::PDelayResp(body) = &message.body else {
            panic!("expected pdelay resp body");
        };
        assert_eq!(body.requesting_port_identity.port_number, 83);
        assert_eq!(
            body.request_receive_timestamp,
            Time::from_micros(200).into()
        );
    }

    #[test]
    fn truncated_message_is_rejected() {
        let message = Message::sync(
            &default_ds(),
            PortIdentity::default(),
            1,
            Interval::ONE_SECOND,
        );
        let mut buffer = [0; MAX_DATA_LEN];
        let len = message.serialize(&mut buffer).unwrap();

        assert!(Message::deserialize(&buffer[..len - 1]).is_err());
    }
}
