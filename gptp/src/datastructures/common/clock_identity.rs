use crate::datastructures::{WireFormat, WireFormatError};

/// The identity of a PTP node.
///
/// Every clock in a gPTP domain needs a unique identity. It is derived
/// deterministically from the link-layer address of one of the node's
/// interfaces (see [`from_mac_address`](`Self::from_mac_address`)).
///
/// The identities compare by lexical byte order, which is the order the best
/// master selection relies on.
///
/// For more details, see *IEEE 802.1AS-2020 section 8.5.2.2*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    /// Create a [`ClockIdentity`] from a mac address.
    ///
    /// Splices the EUI-48 into an EUI-64 by inserting `FF:FE` between the
    /// vendor and device halves, per *802.1AS section 8.5.2.2*.
    ///
    /// # Example
    /// ```
    /// # use gptp::config::ClockIdentity;
    /// let id = ClockIdentity::from_mac_address([0xA, 0xB, 0xC, 0xD, 0xE, 0xF]);
    /// assert_eq!(id.0, [0xA, 0xB, 0xC, 0xFF, 0xFE, 0xD, 0xE, 0xF]);
    /// ```
    pub fn from_mac_address(addr: [u8; 6]) -> Self {
        let mut this = Self([0; 8]);

        this.0[0..3].copy_from_slice(&addr[0..3]);
        this.0[3] = 0xff;
        this.0[4] = 0xfe;
        this.0[5..8].copy_from_slice(&addr[3..6]);

        this
    }
}

impl WireFormat for ClockIdentity {
    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        buffer[0..8].copy_from_slice(&self.0);
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self(buffer[0..8].try_into().unwrap()))
    }
}

impl core::fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, val) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ":")?;
            }

            write!(f, "{:02x}", val)?;
        }

        Ok(())
    }
}
