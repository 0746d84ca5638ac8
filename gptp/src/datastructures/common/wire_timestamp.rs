use crate::{
    datastructures::{WireFormat, WireFormatError},
    time::{Duration, Time},
};

/// The 10-byte on-the-wire timestamp: 48 bits of seconds, 32 bits of
/// nanoseconds. Sub-nanosecond precision travels in the correction field.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireTimestamp {
    /// The seconds field of the timestamp. 48-bit, must fit
    pub seconds: u64,
    /// The nanoseconds field of the timestamp. Must be less than 10^9
    pub nanos: u32,
}

impl WireFormat for WireTimestamp {
    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        buffer[0..6].copy_from_slice(&self.seconds.to_be_bytes()[2..8]);
        buffer[6..10].copy_from_slice(&self.nanos.to_be_bytes());
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        let mut seconds_buffer = [0; 8];
        seconds_buffer[2..8].copy_from_slice(&buffer[0..6]);
        Ok(Self {
            seconds: u64::from_be_bytes(seconds_buffer),
            nanos: u32::from_be_bytes(buffer[6..10].try_into().unwrap()),
        })
    }
}

impl From<Time> for WireTimestamp {
    fn from(instant: Time) -> Self {
        WireTimestamp {
            seconds: instant.secs(),
            nanos: instant.subsec_nanos(),
        }
    }
}

impl From<WireTimestamp> for Time {
    fn from(timestamp: WireTimestamp) -> Self {
        // The 48-bit seconds would overflow a u64 nanosecond count
        Time::from_secs(timestamp.seconds) + Duration::from_nanos(timestamp.nanos as i64)
    }
}
