//! The clock aggregate: one [`PtpInstance`] per node owning everything the
//! ports share.

use arrayvec::ArrayVec;
use atomic_refcell::AtomicRefCell;

use crate::{
    bmc::{AnnounceRecord, RecommendedRole},
    clock::Clock,
    config::{InstanceConfig, Profile},
    datastructures::{
        common::ClockIdentity,
        datasets::{DefaultDs, GrandmasterDs},
    },
    port::Port,
    servo::{PiServo, RateEstimator},
    time::Duration,
};

/// The most ports a single instance drives. The linux daemon warns well
/// before this.
pub const MAX_PORTS: usize = 16;

/// Per-port bookkeeping the election reads without touching the port itself.
/// Single writer: the owning port.
#[derive(Debug)]
pub(crate) struct PortRecord {
    pub(crate) ifindex: u32,
    pub(crate) port_number: u16,
    pub(crate) enabled: bool,
    /// The port's best qualified announce (ERBest)
    pub(crate) erbest: Option<AnnounceRecord>,
    /// Role handed out by the last election, taken by the port when it
    /// next gets to run
    pub(crate) recommended_role: Option<RecommendedRole>,
}

/// State shared between all ports of an instance
#[derive(Debug)]
pub struct PtpInstanceState {
    pub(crate) default_ds: DefaultDs,
    pub(crate) grandmaster_ds: GrandmasterDs,
    /// Grandmaster named by the previous election's best announce
    pub(crate) last_ebest_identity: Option<ClockIdentity>,
    pub(crate) port_records: ArrayVec<PortRecord, MAX_PORTS>,
    pub(crate) servo: PiServo,
    pub(crate) master_local_rate: RateEstimator,
    pub(crate) local_system_rate: RateEstimator,
    /// Latest servo input, republished over IPC
    pub(crate) last_ml_offset: Duration,
    pub(crate) last_ml_freq_ratio: f64,
    /// Time base indicator of the tracked grandmaster, relayed in our own
    /// follow-ups
    pub(crate) gm_time_base_indicator: u16,
    /// Bumped on every election so runtimes know to let the other ports
    /// apply their recommended roles
    pub(crate) bmca_revision: u32,
}

impl PtpInstanceState {
    pub(crate) fn record_for(&mut self, ifindex: u32) -> Option<&mut PortRecord> {
        self.port_records
            .iter_mut()
            .find(|record| record.ifindex == ifindex)
    }
}

/// A PTP node as a whole: its identity, its current grandmaster, the servo,
/// and the table of ports.
///
/// The instance does not run on its own; create one [`Port`] per network
/// interface with [`add_port`](`Self::add_port`) and feed the ports packets,
/// timestamps and timer expirations. Everything the ports agree on lives
/// behind the shared state cell.
#[derive(Debug)]
pub struct PtpInstance {
    state: AtomicRefCell<PtpInstanceState>,
}

impl PtpInstance {
    pub fn new(config: InstanceConfig, profile: &Profile) -> Self {
        let default_ds = DefaultDs::new(&config, profile);
        Self {
            state: AtomicRefCell::new(PtpInstanceState {
                default_ds,
                grandmaster_ds: GrandmasterDs::claimed_by_self(&default_ds),
                last_ebest_identity: None,
                port_records: ArrayVec::new(),
                servo: PiServo::default(),
                master_local_rate: RateEstimator::default(),
                local_system_rate: RateEstimator::default(),
                last_ml_offset: Duration::ZERO,
                last_ml_freq_ratio: 1.0,
                gm_time_base_indicator: 0,
                bmca_revision: 0,
            }),
        }
    }

    /// Create a port bound to the interface with the given index.
    ///
    /// The port number is the interface index, so port identities stay
    /// stable across restarts.
    ///
    /// # Panics
    /// Panics when more than [`MAX_PORTS`] ports are added or the interface
    /// index is taken, both of which the caller's configuration layer must
    /// have ruled out.
    pub fn add_port<C: Clock>(&self, ifindex: u32, profile: Profile, clock: C) -> Port<'_, C> {
        let mut state = self.state.borrow_mut();
        assert!(
            state.record_for(ifindex).is_none(),
            "duplicate port for interface index {ifindex}"
        );
        state.port_records.push(PortRecord {
            ifindex,
            port_number: ifindex as u16,
            enabled: true,
            erbest: None,
            recommended_role: None,
        });
        drop(state);

        Port::new(&self.state, ifindex, profile, clock)
    }

    /// The grandmaster identity the domain currently agrees on
    pub fn grandmaster_identity(&self) -> ClockIdentity {
        self.state.borrow().grandmaster_ds.grandmaster_identity()
    }

    /// Whether this node is currently the grandmaster
    pub fn is_grandmaster(&self) -> bool {
        let state = self.state.borrow();
        state.grandmaster_ds.grandmaster_identity() == state.default_ds.clock_identity
    }

    /// Election counter; when it moves, every port should be given a chance
    /// to apply its recommended role via
    /// [`Port::apply_recommended_role`](`crate::port::Port::apply_recommended_role`).
    pub fn bmca_revision(&self) -> u32 {
        self.state.borrow().bmca_revision
    }
}
