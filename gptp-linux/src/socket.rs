//! The gPTP Ethernet socket (EtherType 0x88F7) for linux systems

use timestamped_socket::{
    interface::InterfaceName,
    networkaddress::{EthernetAddress, MacAddress},
    socket::{open_interface_ethernet, InterfaceTimestampMode, Open, Socket},
};

const PTP_ETHERTYPE: u16 = 0x88f7;

/// Destination for syncs, follow-ups, announces and signaling
pub const PRIMARY_MULTICAST: EthernetAddress = EthernetAddress::new(
    PTP_ETHERTYPE,
    MacAddress::new([0x01, 0x1b, 0x19, 0x00, 0x00, 0x00]),
    0,
);

/// Link-local destination for the peer delay exchange, never forwarded by
/// bridges
pub const PDELAY_MULTICAST: EthernetAddress = EthernetAddress::new(
    PTP_ETHERTYPE,
    MacAddress::new([0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e]),
    0,
);

pub fn open_ethernet_socket(
    interface: InterfaceName,
    timestamping: InterfaceTimestampMode,
    bind_phc: Option<u32>,
) -> std::io::Result<Socket<EthernetAddress, Open>> {
    let socket = open_interface_ethernet(interface, PTP_ETHERTYPE, timestamping, bind_phc)?;
    socket.join_multicast(PRIMARY_MULTICAST, interface)?;
    socket.join_multicast(PDELAY_MULTICAST, interface)?;
    Ok(socket)
}
