use crate::{
    datastructures::common::ClockQuality,
    time::{Duration, Interval},
};

/// Which published gPTP profile a [`Profile`] value was derived from.
///
/// Nearly all behaviour differences are data-driven through the profile
/// fields; the handful that are not (for example Milan's tolerance for runs
/// of missing responses after qualification) branch on this in small helper
/// functions instead of a trait hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Plain IEEE 802.1AS-2020
    Standard,
    /// Avnu Milan baseline interoperability, 2.0a
    Milan,
    /// AVnu Base/ProAV functional interoperability
    AvnuBase,
    /// AVnu automotive
    Automotive,
}

impl ProfileKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Milan => "milan",
            Self::AvnuBase => "avnu_base",
            Self::Automotive => "automotive",
        }
    }
}

impl core::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything profile-specific, bundled into one immutable value.
///
/// A port never asks "which profile am I running"; it reads the field (or
/// calls the helper) that answers its actual question. The four published
/// profiles are just four initializations of this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub kind: ProfileKind,

    // Transmit cadence (log2 seconds)
    pub sync_interval_log: i8,
    pub announce_interval_log: i8,
    pub pdelay_interval_log: i8,
    /// Cadence to switch to after the sync-rate interval expires
    /// (automotive initial/operational interval management)
    pub operational_sync_interval_log: i8,
    pub operational_pdelay_interval_log: i8,

    // Receipt timers
    pub sync_receipt_timeout_mult: u32,
    pub announce_receipt_timeout_mult: u32,
    pub pdelay_receipt_timeout_mult: u32,
    /// Consecutive wrongly-correlated follow-ups tolerated before the port
    /// gives up on its master
    pub sync_receipt_thresh: u32,

    /// Link delays beyond this magnitude clear `asCapable`; zero disables
    /// the check
    pub neighbor_prop_delay_thresh_ns: i64,

    // asCapable life cycle
    pub initial_as_capable: bool,
    pub as_capable_on_link_up: bool,
    /// Whether `asCapable` survives a link-down event
    pub as_capable_on_link_down: bool,
    /// Successful exchanges needed before `asCapable` is earned; zero
    /// disables the count-based rule
    pub min_pdelay_successes: u32,
    /// Upper edge of the qualification window, zero for unlimited
    pub max_pdelay_successes: u32,
    pub maintain_as_capable_on_timeout: bool,
    pub maintain_as_capable_on_late_response: bool,
    pub late_response_threshold_ms: u32,
    pub consecutive_late_limit: u32,
    pub reset_pdelay_count_on_timeout: bool,

    // Gate behaviours
    pub send_announce_when_as_capable_only: bool,
    pub process_sync_regardless_as_capable: bool,
    pub start_pdelay_on_link_up: bool,

    // Protocol rules
    pub allows_negative_correction_field: bool,
    pub supports_bmca: bool,
    pub bmca_enabled: bool,
    pub force_slave_mode: bool,
    pub automotive_test_status: bool,

    // Clock quality defaults
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
    pub priority1: u8,
    pub priority2: u8,

    // Compliance monitoring; soft limits that only produce warnings
    pub max_convergence_time_ms: u32,
    pub max_sync_jitter_ns: u32,
    pub max_path_delay_variation_ns: u32,
}

impl Profile {
    /// Plain IEEE 802.1AS-2020
    pub fn standard_8021as() -> Self {
        Self {
            kind: ProfileKind::Standard,
            sync_interval_log: 0,
            announce_interval_log: 0,
            pdelay_interval_log: 0,
            operational_sync_interval_log: 0,
            operational_pdelay_interval_log: 0,
            sync_receipt_timeout_mult: 3,
            announce_receipt_timeout_mult: 3,
            pdelay_receipt_timeout_mult: 3,
            sync_receipt_thresh: 3,
            neighbor_prop_delay_thresh_ns: 800_000,
            initial_as_capable: false,
            as_capable_on_link_up: false,
            as_capable_on_link_down: false,
            min_pdelay_successes: 1,
            max_pdelay_successes: 0,
            maintain_as_capable_on_timeout: false,
            maintain_as_capable_on_late_response: false,
            late_response_threshold_ms: 10,
            consecutive_late_limit: 3,
            reset_pdelay_count_on_timeout: true,
            send_announce_when_as_capable_only: true,
            process_sync_regardless_as_capable: true,
            start_pdelay_on_link_up: true,
            allows_negative_correction_field: false,
            supports_bmca: true,
            bmca_enabled: true,
            force_slave_mode: false,
            automotive_test_status: false,
            clock_class: 248,
            clock_accuracy: 0x22,
            offset_scaled_log_variance: 0x436a,
            priority1: 248,
            priority2: 248,
            max_convergence_time_ms: 0,
            max_sync_jitter_ns: 0,
            max_path_delay_variation_ns: 0,
        }
    }

    /// Avnu Milan baseline interoperability 2.0a
    pub fn milan() -> Self {
        Self {
            kind: ProfileKind::Milan,
            sync_interval_log: -3, // 125ms
            min_pdelay_successes: 2,
            max_pdelay_successes: 5,
            maintain_as_capable_on_timeout: true,
            maintain_as_capable_on_late_response: true,
            reset_pdelay_count_on_timeout: false,
            clock_accuracy: 0x20,
            offset_scaled_log_variance: 0x4000,
            max_convergence_time_ms: 100,
            ..Self::standard_8021as()
        }
    }

    /// AVnu Base/ProAV functional interoperability
    pub fn avnu_base() -> Self {
        Self {
            kind: ProfileKind::AvnuBase,
            min_pdelay_successes: 2,
            max_pdelay_successes: 10,
            maintain_as_capable_on_timeout: true,
            clock_accuracy: 0xfe,
            offset_scaled_log_variance: 0x4e5d,
            ..Self::standard_8021as()
        }
    }

    /// AVnu automotive
    pub fn automotive() -> Self {
        Self {
            kind: ProfileKind::Automotive,
            sync_receipt_thresh: 8,
            as_capable_on_link_up: true,
            as_capable_on_link_down: true,
            min_pdelay_successes: 0,
            max_pdelay_successes: 0,
            maintain_as_capable_on_timeout: true,
            maintain_as_capable_on_late_response: true,
            late_response_threshold_ms: 50,
            consecutive_late_limit: 10,
            reset_pdelay_count_on_timeout: false,
            send_announce_when_as_capable_only: false,
            allows_negative_correction_field: true,
            supports_bmca: false,
            bmca_enabled: false,
            force_slave_mode: true,
            automotive_test_status: true,
            clock_accuracy: 0xfe,
            offset_scaled_log_variance: 0x4e5d,
            ..Self::standard_8021as()
        }
    }

    /// Look up a named profile, for configuration files and the CLI
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "standard" | "8021as" => Some(Self::standard_8021as()),
            "milan" => Some(Self::milan()),
            "avnu_base" | "avnu-base" => Some(Self::avnu_base()),
            "automotive" => Some(Self::automotive()),
            _ => None,
        }
    }

    pub fn sync_interval(&self) -> Interval {
        Interval::from_log_2(self.sync_interval_log)
    }

    pub fn announce_interval(&self) -> Interval {
        Interval::from_log_2(self.announce_interval_log)
    }

    pub fn pdelay_interval(&self) -> Interval {
        Interval::from_log_2(self.pdelay_interval_log)
    }

    /// Receipt timeout for announces: `mult * 2^announce_interval_log`
    pub fn announce_receipt_timeout(&self, announce_interval: Interval) -> Duration {
        announce_interval.as_duration() * self.announce_receipt_timeout_mult as i32
    }

    /// Receipt timeout for syncs: `mult * 2^sync_interval_log`
    pub fn sync_receipt_timeout(&self, sync_interval: Interval) -> Duration {
        sync_interval.as_duration() * self.sync_receipt_timeout_mult as i32
    }

    /// Receipt timeout for peer delay responses: `mult * 2^pdelay_interval_log`
    pub fn pdelay_receipt_timeout(&self, pdelay_interval: Interval) -> Duration {
        pdelay_interval.as_duration() * self.pdelay_receipt_timeout_mult as i32
    }

    pub fn late_response_threshold(&self) -> Duration {
        Duration::from_millis(self.late_response_threshold_ms as i64)
    }

    pub fn clock_quality(&self) -> ClockQuality {
        ClockQuality {
            clock_class: self.clock_class,
            clock_accuracy: self.clock_accuracy,
            offset_scaled_log_variance: self.offset_scaled_log_variance,
        }
    }

    /// Whether the best-master election runs at all on this node
    pub fn runs_bmca(&self) -> bool {
        self.supports_bmca && self.bmca_enabled
    }

    /// Whether this profile transmits announces in the first place
    pub fn announce_enabled(&self) -> bool {
        self.supports_bmca
    }

    /// Whether a master port may transmit an announce right now
    pub fn sends_announce(&self, as_capable: bool) -> bool {
        self.announce_enabled() && (as_capable || !self.send_announce_when_as_capable_only)
    }

    /// Whether `pdelay_count` many successful exchanges earn `asCapable`
    pub fn qualifies_as_capable(&self, pdelay_count: u32) -> bool {
        self.min_pdelay_successes > 0 && pdelay_count >= self.min_pdelay_successes
    }

    /// How many consecutive missing responses a qualified port tolerates
    /// before losing `asCapable`, or `None` when it never does.
    ///
    /// Milan B.2.2: a qualified port shrugs off isolated missing responses
    /// but three in a row demote it.
    pub fn missing_response_limit(&self) -> Option<u32> {
        match self.kind {
            ProfileKind::Milan => Some(3),
            _ if self.maintain_as_capable_on_timeout => None,
            _ => Some(1),
        }
    }

    /// Whether exceeding the neighbor delay threshold demotes the port.
    ///
    /// The automotive profile logs the violation but keeps the port
    /// capable, since nothing there could ever re-qualify it.
    pub fn enforces_neighbor_delay_threshold(&self) -> bool {
        self.neighbor_prop_delay_thresh_ns > 0 && self.kind != ProfileKind::Automotive
    }

    /// The delay after which an automotive port switches to its operational
    /// cadence and signals the change to its peer
    pub fn sync_rate_interval(&self, is_grandmaster: bool) -> Option<Duration> {
        match self.kind {
            ProfileKind::Automotive => Some(Duration::from_secs(if is_grandmaster {
                8
            } else {
                4
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_profile_defaults() {
        let profile = Profile::standard_8021as();
        assert_eq!(profile.sync_interval_log, 0);
        assert_eq!(profile.neighbor_prop_delay_thresh_ns, 800_000);
        assert_eq!(profile.min_pdelay_successes, 1);
        assert_eq!(profile.max_pdelay_successes, 0);
        assert!(!profile.maintain_as_capable_on_late_response);
        assert_eq!(profile.late_response_threshold_ms, 10);
        assert_eq!(profile.consecutive_late_limit, 3);
        assert!(!profile.allows_negative_correction_field);
        assert!(profile.supports_bmca);
        assert!(!profile.force_slave_mode);
        assert_eq!(profile.clock_class, 248);
        assert_eq!(profile.clock_accuracy, 0x22);
        assert_eq!(profile.offset_scaled_log_variance, 0x436a);
        assert_eq!(profile.max_convergence_time_ms, 0);
    }

    #[test]
    fn milan_profile_defaults() {
        let profile = Profile::milan();
        assert_eq!(profile.sync_interval_log, -3);
        assert_eq!(profile.announce_interval_log, 0);
        assert_eq!(profile.pdelay_interval_log, 0);
        assert!(!profile.initial_as_capable);
        assert_eq!(profile.min_pdelay_successes, 2);
        assert_eq!(profile.max_pdelay_successes, 5);
        assert!(profile.maintain_as_capable_on_late_response);
        assert_eq!(profile.late_response_threshold_ms, 10);
        assert!(!profile.allows_negative_correction_field);
        assert!(profile.supports_bmca);
        assert_eq!(profile.clock_accuracy, 0x20);
        assert_eq!(profile.offset_scaled_log_variance, 0x4000);
        assert_eq!(profile.max_convergence_time_ms, 100);
        assert_eq!(profile.missing_response_limit(), Some(3));
    }

    #[test]
    fn avnu_base_profile_defaults() {
        let profile = Profile::avnu_base();
        assert_eq!(profile.sync_interval_log, 0);
        assert_eq!(profile.min_pdelay_successes, 2);
        assert_eq!(profile.max_pdelay_successes, 10);
        assert!(!profile.maintain_as_capable_on_late_response);
        assert_eq!(profile.clock_accuracy, 0xfe);
        assert_eq!(profile.offset_scaled_log_variance, 0x4e5d);
        assert_eq!(profile.missing_response_limit(), None);
    }

    #[test]
    fn automotive_profile_defaults() {
        let profile = Profile::automotive();
        assert_eq!(profile.sync_interval_log, 0);
        assert!(!profile.initial_as_capable);
        assert!(profile.as_capable_on_link_up);
        assert!(profile.as_capable_on_link_down);
        assert_eq!(profile.min_pdelay_successes, 0);
        assert!(profile.maintain_as_capable_on_late_response);
        assert_eq!(profile.late_response_threshold_ms, 50);
        assert_eq!(profile.consecutive_late_limit, 10);
        assert!(profile.allows_negative_correction_field);
        assert!(!profile.supports_bmca);
        assert!(profile.force_slave_mode);
        assert!(!profile.sends_announce(true));
        assert_eq!(profile.clock_accuracy, 0xfe);
        assert_eq!(profile.offset_scaled_log_variance, 0x4e5d);
    }

    #[test]
    fn announce_gating() {
        let standard = Profile::standard_8021as();
        assert!(standard.sends_announce(true));
        assert!(!standard.sends_announce(false));

        let automotive = Profile::automotive();
        assert!(!automotive.sends_announce(true));
        assert!(!automotive.sends_announce(false));
    }

    #[test]
    fn qualification_window() {
        let milan = Profile::milan();
        assert!(!milan.qualifies_as_capable(1));
        assert!(milan.qualifies_as_capable(2));
        assert!(milan.qualifies_as_capable(6));

        let automotive = Profile::automotive();
        assert!(!automotive.qualifies_as_capable(100));
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            Profile::by_name("milan").map(|p| p.kind),
            Some(ProfileKind::Milan)
        );
        assert_eq!(
            Profile::by_name("automotive").map(|p| p.kind),
            Some(ProfileKind::Automotive)
        );
        assert!(Profile::by_name("isdn").is_none());
    }
}
