//! # ferry-transport
//!
//! Ferry reliable file-transfer protocol over unreliable datagrams.
//!
//! Fixed 20-byte wire format, byte-budget sliding window with per-segment
//! retransmission timers, selective acknowledgements with fast retransmit
//! and hole filling, and in-order reassembly with EOF-terminated delivery.
//!
//! ## Crate structure
//!
//! - [`wire`] — segment/ACK serialization, SACK bitmap, protocol constants
//! - [`rtt`] — smoothed RTT estimation and the clamped RTO
//! - [`sender`] — sliding-window sender state machine
//! - [`receiver`] — reassembly receiver state machine
//! - [`stats`] — per-endpoint transfer statistics
//!
//! The state machines are I/O-free; the `ferry-sender` and `ferry-receiver`
//! daemons own the sockets, files, and timers.

pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod stats;
pub mod wire;
