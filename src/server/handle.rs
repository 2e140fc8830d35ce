//! Shared server state and the send primitives.
//!
//! All per-server state lives in [`ServerShared`], owned through an `Arc` by
//! every [`ServerHandle`]. Two registries track live peers independently:
//! stream writers (present from handshake until the dispatch loop exits) and
//! datagram addresses (present from the first accepted datagram until the
//! stream side closes).

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{ServerEvent, ServerHandler};
use crate::config::ServerConfig;
use crate::error::{MulticastError, SendError};
use crate::transport::{ConnectionRegistry, HandlerRegistry, StreamWriter};
use crate::wire::framing::{encode_datagram, encode_stream};
use crate::{ConnectionId, MessageType};

/// Registry entry for a live stream connection.
#[derive(Debug, Clone)]
pub(crate) struct StreamEntry {
    /// Queue into the connection's write task.
    pub(crate) writer: StreamWriter,
    /// Cancelling this drives the connection to `Closed`.
    pub(crate) close: CancellationToken,
    /// Handler slots for this connection's stream and datagram messages.
    pub(crate) workers: Arc<Semaphore>,
}

impl StreamEntry {
    pub(crate) fn new(writer: StreamWriter, close: CancellationToken, handler_workers: usize) -> Self {
        Self {
            writer,
            close,
            workers: Arc::new(Semaphore::new(handler_workers.max(1))),
        }
    }
}

/// State shared by the accept loop, the datagram loop, every connection
/// task and every handle.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) handlers: HandlerRegistry<ServerHandler>,
    pub(crate) on_connect: Option<ServerEvent>,
    pub(crate) on_disconnect: Option<ServerEvent>,
    pub(crate) streams: ConnectionRegistry<StreamEntry>,
    pub(crate) datagrams: ConnectionRegistry<SocketAddr>,
    pub(crate) udp: UdpSocket,
    pub(crate) shutdown: CancellationToken,
    local_addr: SocketAddr,
    next_id: AtomicU64,
}

impl ServerShared {
    pub(crate) fn new(
        config: ServerConfig,
        handlers: HandlerRegistry<ServerHandler>,
        on_connect: Option<ServerEvent>,
        on_disconnect: Option<ServerEvent>,
        udp: UdpSocket,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            config,
            handlers,
            on_connect,
            on_disconnect,
            streams: ConnectionRegistry::new(),
            datagrams: ConnectionRegistry::new(),
            udp,
            shutdown: CancellationToken::new(),
            local_addr,
            next_id: AtomicU64::new(0),
        }
    }

    /// Next connection id: 0, 1, 2, ... never reused.
    ///
    /// `None` once the 32-bit id space is used up.
    pub(crate) fn assign_id(&self) -> Option<ConnectionId> {
        let next = self.next_id.fetch_add(1, Ordering::Relaxed);
        ConnectionId::try_from(next).ok()
    }
}

impl fmt::Debug for ServerShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerShared")
            .field("local_addr", &self.local_addr)
            .field("streams", &self.streams.len())
            .field("datagrams", &self.datagrams.len())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to a bound server.
///
/// Passed to every handler and callback. Sends never block waiting for the
/// peer: reliable sends return once the frame is queued on the connection's
/// writer, fast sends once the datagram is handed to the socket.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    pub(crate) fn from_shared(shared: ServerShared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub(crate) fn shared(&self) -> &ServerShared {
        &self.shared
    }

    // ========================================================================
    // Reliable (stream)
    // ========================================================================

    /// Send one frame over `id`'s stream.
    ///
    /// Fails immediately with [`SendError::UnknownConnection`] when `id` has
    /// no stream entry. Frames to the same connection keep their order.
    pub fn send_to_client_safe(
        &self,
        id: ConnectionId,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let entry = self
            .shared
            .streams
            .get(id)
            .ok_or(SendError::UnknownConnection(id))?;
        entry.writer.send_frame(message_type, payload)
    }

    /// Send one frame to each of `ids` over their streams.
    ///
    /// Every id is attempted once; all failures come back together.
    pub fn send_to_clients_safe(
        &self,
        ids: &[ConnectionId],
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), MulticastError> {
        let encoded = match encode_stream(message_type, payload) {
            Ok(encoded) => encoded,
            Err(_too_long) => return MulticastError::unencodable(ids.iter().copied(), payload.len()),
        };
        let mut failures = Vec::new();
        for &id in ids {
            let result = match self.shared.streams.get(id) {
                Some(entry) => entry.writer.send_raw(encoded.clone()),
                None => Err(SendError::UnknownConnection(id)),
            };
            if let Err(e) = result {
                failures.push((id, e));
            }
        }
        MulticastError::check(failures)
    }

    /// Send one frame to every connection with a stream entry at call time.
    pub fn broadcast_safe(&self, message_type: MessageType, payload: &[u8]) -> Result<(), MulticastError> {
        let targets = self.shared.streams.snapshot();
        let encoded = match encode_stream(message_type, payload) {
            Ok(encoded) => encoded,
            Err(_too_long) => {
                return MulticastError::unencodable(targets.into_iter().map(|(id, _)| id), payload.len());
            }
        };
        let failures = targets
            .into_iter()
            .filter_map(|(id, entry)| entry.writer.send_raw(encoded.clone()).err().map(|e| (id, e)))
            .collect();
        MulticastError::check(failures)
    }

    // ========================================================================
    // Fast (datagram)
    // ========================================================================

    /// Send one datagram to `id`'s learned address. No retry, no ordering.
    pub fn send_to_client_fast(
        &self,
        id: ConnectionId,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let addr = self
            .shared
            .datagrams
            .get(id)
            .ok_or(SendError::UnknownConnection(id))?;
        self.send_datagram(&encode_datagram(message_type, payload), addr)
    }

    /// Send one datagram to each of `ids`, collecting every failure.
    pub fn send_to_clients_fast(
        &self,
        ids: &[ConnectionId],
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), MulticastError> {
        let encoded = encode_datagram(message_type, payload);
        let mut failures = Vec::new();
        for &id in ids {
            let result = match self.shared.datagrams.get(id) {
                Some(addr) => self.send_datagram(&encoded, addr),
                None => Err(SendError::UnknownConnection(id)),
            };
            if let Err(e) = result {
                failures.push((id, e));
            }
        }
        MulticastError::check(failures)
    }

    /// Send one datagram to every connection with a learned address.
    pub fn broadcast_fast(&self, message_type: MessageType, payload: &[u8]) -> Result<(), MulticastError> {
        let encoded = encode_datagram(message_type, payload);
        let failures = self
            .shared
            .datagrams
            .snapshot()
            .into_iter()
            .filter_map(|(id, addr)| self.send_datagram(&encoded, addr).err().map(|e| (id, e)))
            .collect();
        MulticastError::check(failures)
    }

    fn send_datagram(&self, encoded: &[u8], addr: SocketAddr) -> Result<(), SendError> {
        self.shared.udp.try_send_to(encoded, addr)?;
        Ok(())
    }

    // ========================================================================
    // Introspection & lifecycle
    // ========================================================================

    /// Ids with a live stream, sorted.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.shared.streams.ids()
    }

    /// Whether `id` currently has a stream entry.
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.shared.streams.contains(id)
    }

    /// Datagram address learned for `id`, if any.
    pub fn datagram_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.shared.datagrams.get(id)
    }

    /// Close `id`'s connection. Returns `false` if it was not live.
    ///
    /// The dispatch loop exits, the registry entries go away and the
    /// disconnect callback fires, exactly as for a peer-side close.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        match self.shared.streams.get(id) {
            Some(entry) => {
                entry.close.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting, stop the datagram loop and close every connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    /// Address both transports are bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }
}
