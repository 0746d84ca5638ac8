use crate::datastructures::{
    common::{Tlv, TlvSet, TlvType, WireTimestamp},
    WireFormat, WireFormatError,
};

/// Two-step general message carrying the precise transmit time of the
/// preceding sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FollowUpMessage {
    pub(crate) precise_origin_timestamp: WireTimestamp,
}

impl FollowUpMessage {
    pub(crate) fn content_size(&self) -> usize {
        10
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        self.precise_origin_timestamp.serialize(&mut buffer[0..10])
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self {
            precise_origin_timestamp: WireTimestamp::deserialize(buffer)?,
        })
    }
}

/// The organization id of the IEEE 802.1 committee, used to mark the
/// follow-up and message-interval-request extension TLVs.
pub(crate) const IEEE_802_1_ORG_ID: [u8; 3] = [0x00, 0x80, 0xc2];

const FOLLOW_UP_SUBTYPE: [u8; 3] = [0x00, 0x00, 0x01];

/// The 802.1AS follow-up information TLV (*802.1AS-2020 section 11.4.4.3*)
///
/// Rides in the suffix of every gPTP follow-up. The cumulative scaled rate
/// offset expresses the grandmaster-to-transmitter frequency ratio as
/// `(ratio - 1.0) * 2^41`; the time base indicator changes whenever the
/// grandmaster changed its timescale, which a slave must treat as a sync
/// discontinuity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FollowUpTlv {
    pub(crate) cumulative_scaled_rate_offset: i32,
    pub(crate) gm_time_base_indicator: u16,
    pub(crate) last_gm_phase_change: [u8; 12],
    pub(crate) scaled_last_gm_freq_change: i32,
}

impl FollowUpTlv {
    pub(crate) const VALUE_LEN: usize = 28;

    /// The grandmaster rate offset as a plain frequency ratio
    pub(crate) fn rate_ratio(&self) -> f64 {
        1.0 + self.cumulative_scaled_rate_offset as f64 / (1u64 << 41) as f64
    }

    pub(crate) fn from_tlv_set(suffix: &TlvSet<'_>) -> Option<Self> {
        let value = suffix.find(TlvType::OrganizationExtension)?;
        if value.len() < Self::VALUE_LEN
            || value[0..3] != IEEE_802_1_ORG_ID
            || value[3..6] != FOLLOW_UP_SUBTYPE
        {
            return None;
        }

        Some(Self {
            cumulative_scaled_rate_offset: i32::from_be_bytes(value[6..10].try_into().unwrap()),
            gm_time_base_indicator: u16::from_be_bytes(value[10..12].try_into().unwrap()),
            last_gm_phase_change: value[12..24].try_into().unwrap(),
            scaled_last_gm_freq_change: i32::from_be_bytes(value[24..28].try_into().unwrap()),
        })
    }

    pub(crate) fn write_value(&self, value: &mut [u8; Self::VALUE_LEN]) {
        value[0..3].copy_from_slice(&IEEE_802_1_ORG_ID);
        value[3..6].copy_from_slice(&FOLLOW_UP_SUBTYPE);
        value[6..10].copy_from_slice(&self.cumulative_scaled_rate_offset.to_be_bytes());
        value[10..12].copy_from_slice(&self.gm_time_base_indicator.to_be_bytes());
        value[12..24].copy_from_slice(&self.last_gm_phase_change);
        value[24..28].copy_from_slice(&self.scaled_last_gm_freq_change.to_be_bytes());
    }

    pub(crate) fn as_tlv<'a>(&self, backing: &'a mut [u8; Self::VALUE_LEN]) -> Tlv<'a> {
        self.write_value(backing);
        Tlv {
            tlv_type: TlvType::OrganizationExtension,
            value: backing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::common::TlvSetBuilder;

    #[test]
    fn follow_up_wireformat() {
        let representations = [(
            [0x00, 0x00, 0x45, 0xb1, 0x11, 0x5a, 0x0a, 0x64, 0xfa, 0xb0u8],
            FollowUpMessage {
                precise_origin_timestamp: WireTimestamp {
                    seconds: 1_169_232_218,
                    nanos: 174_389_936,
                },
            },
        )];

        for (byte_representation, object_representation) in representations {
            let mut serialization_buffer = [0; 10];
            object_representation
                .serialize_content(&mut serialization_buffer)
                .unwrap();
            assert_eq!(serialization_buffer, byte_representation);

            let deserialized_data =
                FollowUpMessage::deserialize_content(&byte_representation).unwrap();
            assert_eq!(deserialized_data, object_representation);
        }
    }

    #[test]
    fn tlv_round_trip() {
        let tlv = FollowUpTlv {
            cumulative_scaled_rate_offset: -12345,
            gm_time_base_indicator: 7,
            last_gm_phase_change: [0; 12],
            scaled_last_gm_freq_change: 42,
        };

        let mut value = [0; FollowUpTlv::VALUE_LEN];
        let mut backing = [0; 64];
        let mut builder = TlvSetBuilder::new(&mut backing);
        builder.add(tlv.as_tlv(&mut value)).unwrap();
        let set = builder.build();

        assert_eq!(FollowUpTlv::from_tlv_set(&set), Some(tlv));
    }

    #[test]
    fn rate_ratio_conversion() {
        let tlv = FollowUpTlv {
            cumulative_scaled_rate_offset: 0,
            ..Default::default()
        };
        assert_eq!(tlv.rate_ratio(), 1.0);

        let tlv = FollowUpTlv {
            cumulative_scaled_rate_offset: 1 << 21,
            ..Default::default()
        };
        assert!((tlv.rate_ratio() - (1.0 + 1.0 / (1 << 20) as f64)).abs() < 1e-12);
    }
}
