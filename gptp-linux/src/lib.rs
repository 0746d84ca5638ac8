#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod observer;
pub mod socket;
pub mod tracing;

use timestamped_socket::interface::InterfaceName;

/// Interface index of a named interface, used as the PTP port number
pub fn interface_index(interface: &InterfaceName) -> std::io::Result<u32> {
    let path = format!("/sys/class/net/{}/ifindex", interface);
    std::fs::read_to_string(path)?
        .trim()
        .parse()
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))
}

/// The interface's MAC address, for deriving the clock identity
pub fn interface_mac(interface: &InterfaceName) -> std::io::Result<[u8; 6]> {
    let path = format!("/sys/class/net/{}/address", interface);
    let contents = std::fs::read_to_string(path)?;
    let mut mac = [0u8; 6];
    hex::decode_to_slice(contents.trim().replace(':', ""), &mut mac)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))?;
    Ok(mac)
}

/// Whether the interface's link is operationally up
pub fn link_operstate_up(interface: &InterfaceName) -> bool {
    let path = format!("/sys/class/net/{}/operstate", interface);
    matches!(
        std::fs::read_to_string(path).as_deref().map(str::trim),
        Ok("up")
    )
}
