use crate::datastructures::WireFormatError;

/// Type markers for the TLVs a message may carry as its suffix
///
/// Only the types gPTP actually uses get a named variant; everything else is
/// carried opaquely so unknown TLVs survive forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    /// Organization specific extension (carries the 802.1AS follow-up
    /// information)
    OrganizationExtension,
    /// The list of clock identities the announce traversed
    PathTrace,
    /// Anything this implementation does not interpret
    Other(u16),
}

impl TlvType {
    pub fn to_primitive(self) -> u16 {
        match self {
            Self::OrganizationExtension => 0x0003,
            Self::PathTrace => 0x0008,
            Self::Other(value) => value,
        }
    }

    pub fn from_primitive(value: u16) -> Self {
        match value {
            0x0003 => Self::OrganizationExtension,
            0x0008 => Self::PathTrace,
            value => Self::Other(value),
        }
    }
}

/// A single type-length-value element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tlv_type: TlvType,
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Size of this TLV on the wire, header included
    pub fn wire_size(&self) -> usize {
        4 + self.value.len()
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < self.wire_size() {
            return Err(WireFormatError::BufferTooShort);
        }
        buffer[0..2].copy_from_slice(&self.tlv_type.to_primitive().to_be_bytes());
        buffer[2..4].copy_from_slice(&(self.value.len() as u16).to_be_bytes());
        buffer[4..4 + self.value.len()].copy_from_slice(self.value);
        Ok(())
    }
}

/// The suffix of a message: zero or more TLVs, stored unparsed
///
/// Validated once on deserialization so iteration never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlvSet<'a> {
    bytes: &'a [u8],
}

impl<'a> TlvSet<'a> {
    pub fn wire_size(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < self.bytes.len() {
            return Err(WireFormatError::BufferTooShort);
        }
        buffer[..self.bytes.len()].copy_from_slice(self.bytes);
        Ok(())
    }

    pub(crate) fn deserialize(mut buffer: &'a [u8]) -> Result<Self, WireFormatError> {
        let original = buffer;
        let mut total = 0;

        while !buffer.is_empty() {
            if buffer.len() < 4 {
                return Err(WireFormatError::BufferTooShort);
            }
            let length = u16::from_be_bytes(buffer[2..4].try_into().unwrap()) as usize;
            buffer = buffer
                .get(4 + length..)
                .ok_or(WireFormatError::BufferTooShort)?;
            total += 4 + length;
        }

        Ok(Self {
            bytes: &original[..total],
        })
    }

    /// Iterate over the TLVs in the set
    pub fn tlv(&self) -> TlvSetIterator<'a> {
        TlvSetIterator { bytes: self.bytes }
    }

    /// The value of the first TLV of the given type, if any
    pub fn find(&self, tlv_type: TlvType) -> Option<&'a [u8]> {
        self.tlv()
            .find(|tlv| tlv.tlv_type == tlv_type)
            .map(|tlv| tlv.value)
    }
}

/// Iterator over a validated [`TlvSet`], never fails
#[derive(Debug)]
pub struct TlvSetIterator<'a> {
    bytes: &'a [u8],
}

impl<'a> TlvSetIterator<'a> {
    pub fn empty() -> Self {
        Self { bytes: &[] }
    }
}

impl<'a> Iterator for TlvSetIterator<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }

        // Valid by construction of the owning TlvSet
        let tlv_type = TlvType::from_primitive(u16::from_be_bytes(
            self.bytes[0..2].try_into().unwrap(),
        ));
        let length = u16::from_be_bytes(self.bytes[2..4].try_into().unwrap()) as usize;
        let value = &self.bytes[4..4 + length];
        self.bytes = &self.bytes[4 + length..];

        Some(Tlv { tlv_type, value })
    }
}

/// Serializes TLVs into a caller-provided backing buffer, producing a
/// [`TlvSet`] borrowing from it
#[derive(Debug)]
pub struct TlvSetBuilder<'a> {
    buffer: &'a mut [u8],
    used: usize,
}

impl<'a> TlvSetBuilder<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, used: 0 }
    }

    pub fn add(&mut self, tlv: Tlv<'_>) -> Result<(), WireFormatError> {
        tlv.serialize(&mut self.buffer[self.used..])?;
        self.used += tlv.wire_size();
        Ok(())
    }

    pub fn build(self) -> TlvSet<'a> {
        TlvSet {
            bytes: &self.buffer[..self.used],
        }
    }
}
