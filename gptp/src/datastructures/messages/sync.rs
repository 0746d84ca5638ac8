use crate::datastructures::{common::WireTimestamp, WireFormat, WireFormatError};

/// In two-step operation the origin timestamp is all zeros; the precise
/// value follows in the matching follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncMessage {
    pub(crate) origin_timestamp: WireTimestamp,
}

impl SyncMessage {
    pub(crate) fn content_size(&self) -> usize {
        10
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        self.origin_timestamp.serialize(&mut buffer[0..10])
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self {
            origin_timestamp: WireTimestamp::deserialize(buffer)?,
        })
    }
}
