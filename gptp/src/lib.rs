//! `gptp` is an implementation of the core of a Generalized Precision Time
//! Protocol (IEEE 802.1AS) node: best master election, peer delay
//! measurement with `asCapable` qualification, time distribution, and the
//! clock servo disciplining the local oscillator.
//!
//! The crate is sans-io: it contains no sockets, no threads and no timers.
//! Create a [`PtpInstance`], add one [`port::Port`] per network interface,
//! and drive the ports with received packets, transmit timestamps, link
//! changes and timer expirations. Every call returns
//! [`port::PortAction`]s telling the caller what to send and which timers
//! to (re)arm. `gptp-linux` contains a tokio-based runtime doing exactly
//! that on top of raw Ethernet sockets.
//!
//! Behaviour is parametrised by a [`config::Profile`]; the Standard,
//! Milan, AVnu Base and Automotive profiles ship as named constructors.

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

pub mod bmc;
mod clock;
pub mod config;
pub mod datastructures;
pub mod observability;
pub mod port;
mod ptp_instance;
mod servo;
pub mod time;

pub use clock::Clock;
pub use ptp_instance::{PtpInstance, PtpInstanceState, MAX_PORTS};
