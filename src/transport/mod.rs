//! Building blocks shared by the server and client roles.
//!
//! # Architecture
//!
//! ```text
//!  read loop ──► HandlerRegistry ──► handler(ctx, ...)
//!                                         │
//!                                         ▼ send_*
//!  ConnectionRegistry ──► StreamWriter ──► write loop ──► socket
//! ```
//!
//! - [`handlers`]: message type → handler map, frozen once dispatch starts
//! - [`registry`]: id → live endpoint map, the only state mutated by many tasks
//! - [`writer`]: single-writer task per stream socket, fed by a queue
//! - [`retry`]: fixed-delay retry used by client connect

pub mod handlers;
pub mod registry;
pub mod retry;
pub mod writer;

pub use handlers::HandlerRegistry;
pub use registry::ConnectionRegistry;
pub use writer::StreamWriter;
