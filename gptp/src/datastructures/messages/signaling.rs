use super::follow_up::IEEE_802_1_ORG_ID;
use crate::datastructures::{
    common::{PortIdentity, Tlv, TlvSet, TlvType},
    WireFormat, WireFormatError,
};

/// General message through which a peer requests different transmit
/// cadences from this port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SignalingMessage {
    pub(crate) target_port_identity: PortIdentity,
}

impl SignalingMessage {
    pub(crate) fn content_size(&self) -> usize {
        10
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        self.target_port_identity.serialize(&mut buffer[0..10])
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self {
            target_port_identity: PortIdentity::deserialize(buffer)?,
        })
    }
}

const MESSAGE_INTERVAL_REQUEST_SUBTYPE: [u8; 3] = [0x00, 0x00, 0x02];

/// A requested log interval of 127 leaves the current cadence unchanged;
/// 126 restores the profile's initial value (*802.1AS-2020 section 10.6.4.3*).
pub(crate) const INTERVAL_DO_NOT_CHANGE: i8 = 127;
pub(crate) const INTERVAL_SET_INITIAL: i8 = 126;

/// The 802.1AS message interval request TLV riding in a signaling message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MessageIntervalRequestTlv {
    pub(crate) link_delay_interval: i8,
    pub(crate) time_sync_interval: i8,
    pub(crate) announce_interval: i8,
}

impl MessageIntervalRequestTlv {
    pub(crate) const VALUE_LEN: usize = 12;

    pub(crate) fn from_tlv_set(suffix: &TlvSet<'_>) -> Option<Self> {
        let value = suffix.find(TlvType::OrganizationExtension)?;
        if value.len() < Self::VALUE_LEN
            || value[0..3] != IEEE_802_1_ORG_ID
            || value[3..6] != MESSAGE_INTERVAL_REQUEST_SUBTYPE
        {
            return None;
        }

        Some(Self {
            link_delay_interval: value[6] as i8,
            time_sync_interval: value[7] as i8,
            announce_interval: value[8] as i8,
        })
    }

    pub(crate) fn write_value(&self, value: &mut [u8; Self::VALUE_LEN]) {
        value[0..3].copy_from_slice(&IEEE_802_1_ORG_ID);
        value[3..6].copy_from_slice(&MESSAGE_INTERVAL_REQUEST_SUBTYPE);
        value[6] = self.link_delay_interval as u8;
        value[7] = self.time_sync_interval as u8;
        value[8] = self.announce_interval as u8;
        value[9..12].fill(0);
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
    use crate::datastructures::common::{ClockIdentity, TlvSetBuilder};

    #[test]
    fn signaling_wireformat() {
        let representations = [(
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0au8],
            SignalingMessage {
                target_port_identity: PortIdentity {
                    clock_identity: ClockIdentity([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
                    port_number: 0x090a,
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
                SignalingMessage::deserialize_content(&byte_representation).unwrap();
            assert_eq!(deserialized_data, object_representation);
        }
    }

    #[test]
    fn interval_request_round_trip() {
        let request = MessageIntervalRequestTlv {
            link_delay_interval: INTERVAL_DO_NOT_CHANGE,
            time_sync_interval: -3,
            announce_interval: INTERVAL_SET_INITIAL,
        };

        let mut value = [0; MessageIntervalRequestTlv::VALUE_LEN];
        let mut backing = [0; 64];
        let mut builder = TlvSetBuilder::new(&mut backing);
        builder.add(request.as_tlv(&mut value)).unwrap();
        let set = builder.build();

        assert_eq!(MessageIntervalRequestTlv::from_tlv_set(&set), Some(request));
    }
}
