//! General datastructures as defined by IEEE 802.1AS / IEEE 1588

use core::fmt::Debug;

pub mod common;
pub mod datasets;
pub mod messages;

/// Errors that can occur when parsing or emitting the PTP wire format
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum WireFormatError {
    #[cfg_attr(feature = "std", error("enum conversion failed"))]
    EnumConversionError,
    #[cfg_attr(feature = "std", error("buffer too short"))]
    BufferTooShort,
    #[cfg_attr(feature = "std", error("capacity error"))]
    CapacityError,
    #[cfg_attr(feature = "std", error("invalid message"))]
    Invalid,
    #[cfg_attr(
        feature = "std",
        error("message is not gPTP (transportSpecific != 1)")
    )]
    UnsupportedTransport,
}

pub(crate) trait WireFormat: Debug + Clone + Eq {
    /// Serializes the object into the PTP wire format.
    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError>;

    /// Deserializes the object from the PTP wire format.
    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError>;
}
