use super::Header;
use crate::datastructures::{
    common::{ClockIdentity, ClockQuality, SystemIdentity, TimeSource, WireTimestamp},
    WireFormat, WireFormatError,
};

/// General message advertising the grandmaster a port is synchronized to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AnnounceMessage {
    pub(crate) header: Header,
    pub(crate) origin_timestamp: WireTimestamp,
    pub(crate) current_utc_offset: i16,
    pub(crate) grandmaster_priority_1: u8,
    pub(crate) grandmaster_clock_quality: ClockQuality,
    pub(crate) grandmaster_priority_2: u8,
    pub(crate) grandmaster_identity: ClockIdentity,
    pub(crate) steps_removed: u16,
    pub(crate) time_source: TimeSource,
}

impl AnnounceMessage {
    pub(crate) fn content_size(&self) -> usize {
        30
    }

    /// The best-master priority vector this announce advertises
    pub(crate) fn system_identity(&self) -> SystemIdentity {
        SystemIdentity::new(
            self.grandmaster_priority_1,
            self.grandmaster_clock_quality,
            self.grandmaster_priority_2,
            self.grandmaster_identity,
        )
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 30 {
            return Err(WireFormatError::BufferTooShort);
        }

        self.origin_timestamp.serialize(&mut buffer[0..10])?;
        buffer[10..12].copy_from_slice(&self.current_utc_offset.to_be_bytes());
        buffer[12] = 0;
        buffer[13] = self.grandmaster_priority_1;
        self.grandmaster_clock_quality
            .serialize(&mut buffer[14..18])?;
        buffer[18] = self.grandmaster_priority_2;
        self.grandmaster_identity.serialize(&mut buffer[19..27])?;
        buffer[27..29].copy_from_slice(&self.steps_removed.to_be_bytes());
        buffer[29] = self.time_source.to_primitive();

        Ok(())
    }

    pub(crate) fn deserialize_content(
        header: Header,
        buffer: &[u8],
    ) -> Result<Self, WireFormatError> {
        if buffer.len() < 30 {
            return Err(WireFormatError::BufferTooShort);
        }

        Ok(Self {
            header,
            origin_timestamp: WireTimestamp::deserialize(&buffer[0..10])?,
            current_utc_offset: i16::from_be_bytes(buffer[10..12].try_into().unwrap()),
            grandmaster_priority_1: buffer[13],
            grandmaster_clock_quality: ClockQuality::deserialize(&buffer[14..18])?,
            grandmaster_priority_2: buffer[18],
            grandmaster_identity: ClockIdentity::deserialize(&buffer[19..27])?,
            steps_removed: u16::from_be_bytes(buffer[27..29].try_into().unwrap()),
            time_source: TimeSource::from_primitive(buffer[29]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_wireformat() {
        let byte_representation = [
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x25, 0, 0x60, 0x96, 0x22, 0x43, 0x6a, 0x60, 1, 2,
            3, 4, 5, 6, 7, 8, 0x00, 0x02, 0xa0,
        ];

        let message = AnnounceMessage {
            header: Header::default(),
            origin_timestamp: WireTimestamp::default(),
            current_utc_offset: 37,
            grandmaster_priority_1: 96,
            grandmaster_clock_quality: ClockQuality {
                clock_class: 150,
                clock_accuracy: 0x22,
                offset_scaled_log_variance: 0x436a,
            },
            grandmaster_priority_2: 96,
            grandmaster_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            steps_removed: 2,
            time_source: TimeSource::InternalOscillator,
        };

        let mut buffer = [0; 30];
        message.serialize_content(&mut buffer).unwrap();
        assert_eq!(buffer, byte_representation);

        let deserialized =
            AnnounceMessage::deserialize_content(Header::default(), &byte_representation).unwrap();
        assert_eq!(deserialized, message);
    }

    #[test]
    fn system_identity_uses_grandmaster_fields() {
        let message = AnnounceMessage {
            header: Header::default(),
            origin_timestamp: WireTimestamp::default(),
            current_utc_offset: 0,
            grandmaster_priority_1: 128,
            grandmaster_clock_quality: ClockQuality {
                clock_class: 248,
                clock_accuracy: 0x22,
                offset_scaled_log_variance: 0x436a,
            },
            grandmaster_priority_2: 248,
            grandmaster_identity: ClockIdentity([0, 0, 0, 0, 0, 0, 0, 1]),
            steps_removed: 0,
            time_source: TimeSource::InternalOscillator,
        };

        assert_eq!(
            message.system_identity().as_bytes(),
            &[128, 248, 0x22, 0x43, 0x6a, 248, 0, 0, 0, 0, 0, 0, 0, 1]
        );
    }
}
