//! Wire formats shared by clients and servers.
//!
//! Two framings, both big-endian:
//!
//! ```text
//! stream:            [u32 message type][u32 payload length][payload]
//! datagram (→client): [u32 message type][payload]
//! datagram (→server): [u32 connection id][u32 message type][payload]
//! ```
//!
//! The stream handshake is a bare `[u32 connection id]` written by the server
//! before any frame. These layouts are the contract between independently
//! built peers and must stay bit-exact.
//!
//! See [`framing`] for the codec.

pub mod framing;

pub use framing::{Frame, FrameError};
