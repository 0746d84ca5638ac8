use crate::datastructures::common::ClockIdentity;

/// Per-node configuration, fixed for the lifetime of the instance
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct InstanceConfig {
    pub clock_identity: ClockIdentity,
    /// Overrides the profile's priority1 default. 255 means slave-only.
    pub priority_1: Option<u8>,
    /// Overrides the profile's priority2 default
    pub priority_2: Option<u8>,
    pub domain_number: u8,
}
