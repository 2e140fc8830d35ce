//! Server role: accepts peers, assigns connection ids, dispatches their
//! messages and sends to one, many or all of them.
//!
//! # Lifecycle
//!
//! ```text
//! Server::new ── register/on_connect/on_disconnect ──► bind ──► serve
//!                                                       │
//!                      ┌────────────────────────────────┴──────────────┐
//!                      ▼                                               ▼
//!              accept loop (TCP)                          datagram loop (UDP)
//!         one task per connection:                  routes by embedded conn id,
//!   handshake → dispatch → close                    learns each id's address
//! ```
//!
//! Handlers and the connect/disconnect callbacks receive a [`ServerHandle`],
//! the cloneable side of the server that owns the registries and exposes
//! the send primitives.

mod datagram;
mod handle;
mod stream;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::OwnedSemaphorePermit;

use crate::config::ServerConfig;
use crate::constants::ACCEPT_ERROR_BACKOFF;
use crate::transport::HandlerRegistry;
use crate::{ConnectionId, MessageType};

pub use handle::ServerHandle;
use handle::ServerShared;

/// Server-side message handler.
///
/// Receives the server handle, the sender's connection id and the exact
/// payload bytes. Runs on the blocking pool; it must return in bounded time.
pub type ServerHandler =
    Arc<dyn Fn(&ServerHandle, ConnectionId, &[u8]) -> Result<()> + Send + Sync>;

/// Connect/disconnect notification.
pub type ServerEvent = Arc<dyn Fn(&ServerHandle, ConnectionId) + Send + Sync>;

/// Unstarted server: collects handlers and callbacks.
///
/// Registration takes `&mut self` and [`Server::bind`] consumes the server,
/// so nothing can be registered once dispatch has begun.
pub struct Server {
    config: ServerConfig,
    handlers: HandlerRegistry<ServerHandler>,
    on_connect: Option<ServerEvent>,
    on_disconnect: Option<ServerEvent>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Server with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Server with explicit configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Register `handler` for `message_type`. The last registration wins.
    pub fn register<F>(&mut self, message_type: MessageType, handler: F)
    where
        F: Fn(&ServerHandle, ConnectionId, &[u8]) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.register(message_type, Arc::new(handler));
    }

    /// Callback fired after a connection's id has been sent to it.
    pub fn on_connect<F>(&mut self, callback: F)
    where
        F: Fn(&ServerHandle, ConnectionId) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
    }

    /// Callback fired once a connection has been removed from the registry.
    pub fn on_disconnect<F>(&mut self, callback: F)
    where
        F: Fn(&ServerHandle, ConnectionId) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
    }

    /// Bind the stream listener and the datagram socket on `addr`.
    ///
    /// The datagram socket binds to the exact address the listener got, so
    /// port 0 yields one shared port for both transports.
    pub async fn bind(self, addr: &str) -> Result<BoundServer> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind stream listener on {addr}"))?;
        let local_addr = listener.local_addr()?;
        let udp = UdpSocket::bind(local_addr)
            .await
            .with_context(|| format!("Failed to bind datagram socket on {local_addr}"))?;
        // Sends go through `try_send_to`, which reports WouldBlock until the
        // reactor has seen the socket writable once.
        udp.writable()
            .await
            .with_context(|| format!("Datagram socket on {local_addr} never became writable"))?;

        log::info!("[Server] Listening on {}", local_addr);

        let shared = ServerShared::new(
            self.config,
            self.handlers,
            self.on_connect,
            self.on_disconnect,
            udp,
            local_addr,
        );
        Ok(BoundServer {
            listener,
            handle: ServerHandle::from_shared(shared),
        })
    }

    /// Bind on `addr` and serve until [`ServerHandle::shutdown`].
    pub async fn start(self, addr: &str) -> Result<()> {
        self.bind(addr).await?.serve().await
    }
}

/// Server whose sockets are bound but not yet serving.
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    handle: ServerHandle,
}

impl BoundServer {
    /// Address both transports are bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Handle for sending and shutdown from outside handlers.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Run the accept loop and the datagram loop until shutdown.
    ///
    /// A failed accept is logged and never ends the loop.
    pub async fn serve(self) -> Result<()> {
        let Self { listener, handle } = self;
        let shutdown = handle.shared().shutdown.clone();
        let datagram_task = tokio::spawn(datagram::serve(handle.clone()));

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    log::info!("[Server] Shutdown requested, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let Some(id) = handle.shared().assign_id() else {
                            log::error!("[Server] Connection ids exhausted, refusing {}", peer);
                            continue;
                        };
                        tokio::spawn(stream::run(handle.clone(), id, stream, peer));
                    }
                    Err(e) => {
                        log::error!("[Server] Accept error: {e}");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        if let Err(e) = datagram_task.await {
            log::error!("[Server] Datagram loop panicked: {e}");
        }
        Ok(())
    }
}

/// Run `handler` on the blocking pool, holding a worker permit until it returns.
///
/// Fire-and-forget: the caller's read loop moves on as soon as the task is
/// spawned. Errors are logged, never propagated to the connection.
fn invoke(
    handle: &ServerHandle,
    handler: &ServerHandler,
    id: ConnectionId,
    message_type: MessageType,
    payload: Bytes,
    permit: OwnedSemaphorePermit,
) {
    let handle = handle.clone();
    let handler = Arc::clone(handler);
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        if let Err(e) = handler(&handle, id, &payload) {
            log::warn!(
                "[Server] Handler for message type {} from conn {} failed: {e:#}",
                message_type,
                id
            );
        }
    });
}
