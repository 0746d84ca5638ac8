use core::iter::Fuse;

use arrayvec::ArrayVec;

use crate::datastructures::common::PortIdentity;

/// Identification of a packet that should be sent out.
///
/// The caller receives this from a [`PortAction::SendEvent`] and should
/// return it to the [`Port`](`super::Port`) with
/// [`Port::handle_send_timestamp`](`super::Port::handle_send_timestamp`) once
/// the transmit timestamp of that packet is known.
///
/// This type is non-copy and non-clone on purpose to ensure a single
/// [`handle_send_timestamp`](`super::Port::handle_send_timestamp`) per
/// [`SendEvent`](`PortAction::SendEvent`).
#[derive(Debug)]
pub struct TimestampContext {
    pub(super) inner: TimestampContextInner,
}

#[derive(Debug)]
pub(super) enum TimestampContextInner {
    Sync {
        id: u16,
    },
    PDelayReq {
        id: u16,
    },
    PDelayResp {
        id: u16,
        requestor_identity: PortIdentity,
    },
}

/// The timers a port runs, at most one pending instance each.
///
/// Scheduling a timer that is already pending replaces the earlier deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Transmit cadence for announces
    Announce,
    /// Transmit cadence for syncs
    Sync,
    /// Transmit cadence for peer delay requests
    PDelay,
    /// Liveness of the master's announces
    AnnounceReceipt,
    /// Liveness of the master's syncs
    SyncReceipt,
    /// A peer delay response failed to arrive in time
    PDelayResponseReceipt,
    /// Re-enable peer delay after a misbehaving-peer halt
    PDelayReenable,
    /// Debounced trigger for the best-master election
    StateChange,
    /// Automotive switch from initial to operational cadence
    SyncRate,
}

/// An action the [`Port`](`super::Port`) needs the user to perform
#[derive(Debug)]
#[must_use]
pub enum PortAction<'a> {
    /// Send a time-critical packet and capture its transmit timestamp.
    ///
    /// Once the packet is sent and the timestamp is known the user should
    /// return the given [`TimestampContext`] using
    /// [`Port::handle_send_timestamp`](`super::Port::handle_send_timestamp`).
    ///
    /// Packets marked link local are peer delay messages and go to the
    /// 802.1AS peer-delay multicast address.
    SendEvent {
        context: TimestampContext,
        data: &'a [u8],
        link_local: bool,
    },
    /// Send a general packet, no timestamp needed
    SendGeneral { data: &'a [u8], link_local: bool },
    /// Start or replace the given timer; call the matching
    /// `handle_*` method on the port in `duration` from now
    ResetTimer {
        kind: TimerKind,
        duration: core::time::Duration,
    },
    /// Cancel the given timer if pending
    StopTimer { kind: TimerKind },
}

const MAX_ACTIONS: usize = 6;

/// An Iterator over [`PortAction`]s
///
/// These are returned by [`Port`](`super::Port`) whenever the library needs
/// the user to perform actions against the system.
///
/// **Guarantee to the user:** any one set of actions contains at most a
/// single event send.
#[derive(Debug)]
#[must_use]
pub struct PortActionIterator<'a> {
    internal: Fuse<<ArrayVec<PortAction<'a>, MAX_ACTIONS> as IntoIterator>::IntoIter>,
}

impl<'a> PortActionIterator<'a> {
    /// Get an empty iterator
    pub fn empty() -> Self {
        Self {
            internal: ArrayVec::new().into_iter().fuse(),
        }
    }

    pub(super) fn from(list: ArrayVec<PortAction<'a>, MAX_ACTIONS>) -> Self {
        Self {
            internal: list.into_iter().fuse(),
        }
    }
}

impl<'a> Iterator for PortActionIterator<'a> {
    type Item = PortAction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.internal.next()
    }
}
