//! Flera - handler-routed messaging over two transports.
//!
//! A server and its clients exchange typed messages over a reliable ordered
//! stream (TCP, the "safe" path) and an unreliable datagram socket (UDP, the
//! "fast" path). Messages carry a 32-bit message type; each side routes them
//! to the handler registered for that type.
//!
//! # Architecture
//!
//! ```text
//! Client process                               Server process
//! ┌──────────────────┐   [id] then frames     ┌───────────────────────────┐
//! │ Client           │◄──────── TCP ─────────►│ accept loop               │
//! │  stream loop     │                        │  one task per connection  │
//! │  datagram loop   │◄──────── UDP ─────────►│ datagram loop (shared)    │
//! └──────────────────┘   [id][type][payload]  └───────────────────────────┘
//! ```
//!
//! The server assigns every connection an id (0, 1, 2, ...; never reused)
//! and sends it as the first four bytes of the stream. The client tags its
//! datagrams with that id so the server can route them and learn where to
//! send fast messages back.
//!
//! # Modules
//!
//! - [`wire`] - frame layouts and codec
//! - [`transport`] - handler and connection registries, stream writer, retry
//! - [`server`] - [`Server`] / [`ServerHandle`]
//! - [`client`] - [`Client`] / [`ClientHandle`]
//! - [`config`] - tunables
//!
//! # Example
//!
//! ```no_run
//! use flera::{Client, Server};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut server = Server::new();
//! server.register(0, |server, id, payload| {
//!     server.broadcast_safe(0, payload)?;
//!     log::info!("conn {id} said {} bytes", payload.len());
//!     Ok(())
//! });
//! let bound = server.bind("127.0.0.1:7777").await?;
//! tokio::spawn(bound.serve());
//!
//! let mut client = Client::new();
//! client.register(0, |_, payload| {
//!     println!("{}", String::from_utf8_lossy(payload));
//!     Ok(())
//! });
//! client.connect("127.0.0.1:7777").await?;
//! client.handle().send_safe(0, b"hello")?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod server;
pub mod transport;
pub mod wire;

/// Server-assigned identity of a logical peer.
pub type ConnectionId = u32;

/// Application-chosen message type. `0xFFFF_FFFF` is reserved.
pub type MessageType = u32;

pub use client::{Client, ClientHandle, ClientState};
pub use config::{ClientConfig, RetryPolicy, ServerConfig};
pub use constants::REGISTER_DATAGRAM;
pub use error::{MulticastError, SendError};
pub use server::{BoundServer, Server, ServerHandle};
