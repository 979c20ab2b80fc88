//! Cycle-level model of the DAQnet board top level.
//!
//! The crate models the gateware that sits between an Ethernet MAC and the
//! IP stack on the DAQnet sensor and switch boards: the PLL bring-up that
//! gates the synchronous domain, the RX/TX frame handshakes, the link status
//! signals and the per-board composition of those blocks. A [`board::Board`]
//! steps a composed design edge by edge while protocol monitors check every
//! cycle.

pub mod blinker;
pub mod board;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod link;
pub mod platform;
pub mod producer;
pub mod trace;
pub mod tracing;
pub mod types;
