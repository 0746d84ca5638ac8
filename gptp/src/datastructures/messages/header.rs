use super::MessageType;
use crate::datastructures::{
    common::{PortIdentity, TimeInterval},
    WireFormat, WireFormatError,
};

/// The transportSpecific / majorSdoId nibble all gPTP messages carry.
/// Frames with any other value belong to a different PTP profile and are
/// discarded before the body is looked at.
pub(crate) const GPTP_TRANSPORT_SPECIFIC: u8 = 0x1;

/// The common 34-byte header at the start of every PTP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) domain_number: u8,
    pub(crate) two_step_flag: bool,
    pub(crate) leap61: bool,
    pub(crate) leap59: bool,
    pub(crate) current_utc_offset_valid: bool,
    pub(crate) ptp_timescale: bool,
    pub(crate) time_traceable: bool,
    pub(crate) frequency_traceable: bool,
    pub(crate) correction_field: TimeInterval,
    pub(crate) source_port_identity: PortIdentity,
    pub(crate) sequence_id: u16,
    pub(crate) log_message_interval: i8,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            domain_number: 0,
            two_step_flag: false,
            leap61: false,
            leap59: false,
            current_utc_offset_valid: false,
            ptp_timescale: true,
            time_traceable: false,
            frequency_traceable: false,
            correction_field: TimeInterval::default(),
            source_port_identity: PortIdentity::default(),
            sequence_id: 0,
            log_message_interval: 0x7f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeserializedHeader {
    pub(crate) header: Header,
    pub(crate) message_type: MessageType,
    pub(crate) message_length: u16,
}

impl Header {
    pub(crate) fn wire_size(&self) -> usize {
        34
    }

    fn control_field(message_type: MessageType) -> u8 {
        match message_type {
            MessageType::Sync => 0x00,
            MessageType::FollowUp => 0x02,
            _ => 0x05,
        }
    }

    pub(crate) fn serialize_header(
        &self,
        content_type: MessageType,
        content_length: usize,
        buffer: &mut [u8],
    ) -> Result<(), WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        buffer[0] = (GPTP_TRANSPORT_SPECIFIC << 4) | ((content_type as u8) & 0x0f);
        buffer[1] = 0x02; // PTP version 2
        buffer[2..4].copy_from_slice(&((content_length + 34) as u16).to_be_bytes());
        buffer[4] = self.domain_number;
        buffer[5] = 0;
        buffer[6] = u8::from(self.two_step_flag) << 1;
        buffer[7] = u8::from(self.leap61)
            | (u8::from(self.leap59) << 1)
            | (u8::from(self.current_utc_offset_valid) << 2)
            | (u8::from(self.ptp_timescale) << 3)
            | (u8::from(self.time_traceable) << 4)
            | (u8::from(self.frequency_traceable) << 5);
        self.correction_field.serialize(&mut buffer[8..16])?;
        buffer[16..20].fill(0);
        self.source_port_identity.serialize(&mut buffer[20..30])?;
        buffer[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buffer[32] = Self::control_field(content_type);
        buffer[33] = self.log_message_interval as u8;

        Ok(())
    }

    pub(crate) fn deserialize_header(buffer: &[u8]) -> Result<DeserializedHeader, WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        if buffer[0] >> 4 != GPTP_TRANSPORT_SPECIFIC {
            return Err(WireFormatError::UnsupportedTransport);
        }

        if buffer[1] & 0x0f != 2 {
            return Err(WireFormatError::Invalid);
        }

        let message_type =
            MessageType::try_from(buffer[0] & 0x0f).map_err(|_| WireFormatError::EnumConversionError)?;

        Ok(DeserializedHeader {
            header: Self {
                domain_number: buffer[4],
                two_step_flag: buffer[6] & (1 << 1) > 0,
                leap61: buffer[7] & (1 << 0) > 0,
                leap59: buffer[7] & (1 << 1) > 0,
                current_utc_offset_valid: buffer[7] & (1 << 2) > 0,
                ptp_timescale: buffer[7] & (1 << 3) > 0,
                time_traceable: buffer[7] & (1 << 4) > 0,
                frequency_traceable: buffer[7] & (1 << 5) > 0,
                correction_field: TimeInterval::deserialize(&buffer[8..16])?,
                source_port_identity: PortIdentity::deserialize(&buffer[20..30])?,
                sequence_id: u16::from_be_bytes(buffer[30..32].try_into().unwrap()),
                log_message_interval: buffer[33] as i8,
            },
            message_type,
            message_length: u16::from_be_bytes(buffer[2..4].try_into().unwrap()),
        })
    }
}
