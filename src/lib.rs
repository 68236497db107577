//! A lightweight reliable-datagram transport layered on top of UDP.
//!
//! The protocol provides, on demand: best-effort single-datagram delivery,
//! reliable at-least-once delivery with retransmission until acknowledged or
//! a retry budget is exhausted, in-order delivery of reliable messages per
//! remote peer, fragmentation and reassembly of payloads larger than a
//! single datagram, and a connection lifecycle built on a three-way
//! handshake, periodic keep-alive pings, and an inactivity timeout.
//!
//! There is no encryption, congestion control, or flow control here, see
//! the crate-level design notes for the full list of non-goals. What is
//! here is the part that actually has engineering in it: interacting
//! timers, sequence-space arithmetic, a reorder buffer, and a handful of
//! interleaved control and data packet types.
//!
//! The crate can be tuned by the following feature flags:
//!
//! 1. `client` enables [`client`] functionality.
//! 2. `server` enables [`server`] functionality.

mod addr;
mod config;
mod connection;
mod core;
mod handle;
mod wire;

pub mod error;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod server;

pub use config::TransportConfig;
pub use connection::{
    ConnId,
    DisconnectReason,
};
pub use error::Error;
pub use handle::ConnectionHandle;
pub use wire::{
    MAX_DATAGRAM,
    MAX_PAYLOAD,
};
