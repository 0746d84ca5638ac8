//! Records published to external consumers (the AVB media stack) over the
//! daemon's IPC socket.

pub use crate::port::PortStats;

/// One snapshot of a port's synchronization state.
///
/// The field set is the contract with IPC consumers; extend it only at the
/// end and never reorder.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TimeSyncReport {
    /// Offset of the local clock to the master at the last sample
    pub ml_phase_offset_ns: i64,
    /// Offset of the local (device) clock to the OS clock
    pub ls_phase_offset_ns: i64,
    /// Frequency ratio of the master's clock to the local clock
    pub ml_freq_ratio: f64,
    /// Frequency ratio of the local clock to the OS clock
    pub ls_freq_ratio: f64,
    pub local_time_ns: u64,
    pub sync_count: u32,
    pub pdelay_count: u32,
    pub port_state: u8,
    pub as_capable: bool,
    pub grandmaster_id: [u8; 8],
    pub domain_number: u8,
    pub clock_identity: [u8; 8],
    pub priority1: u8,
    pub clock_class: u8,
    pub offset_scaled_log_variance: u16,
    pub clock_accuracy: u8,
    pub priority2: u8,
    pub log_sync_interval: i8,
    pub log_announce_interval: i8,
    pub log_pdelay_interval: i8,
    pub port_number: u16,
}
