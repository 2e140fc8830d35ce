//! Per-connection stream task.
//!
//! Each accepted socket walks `Connecting → Handshaking → Active → Closed`:
//!
//! - **Handshaking**: the 4-byte id is written before the connection is
//!   published, so it is always the first thing the peer reads. Then the
//!   connect callback fires.
//! - **Active**: read one whole frame, look up its handler, hand it to the
//!   blocking pool and read the next one. Handlers are fire-and-forget. Each
//!   connection owns `handler_workers` slots; when its own handlers hold them
//!   all, this loop stops reading until one finishes. Other connections have
//!   their own slots and keep going.
//! - **Closed**: any read or framing error, an explicit disconnect or server
//!   shutdown. The registry entries are removed and the disconnect callback
//!   fires. A closed connection never comes back; a reconnecting peer gets a
//!   new id.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::handle::StreamEntry;
use super::{invoke, ServerHandle};
use crate::constants::REGISTER_DATAGRAM;
use crate::transport::StreamWriter;
use crate::wire::framing::{encode_handshake, read_stream_frame};
use crate::wire::FrameError;
use crate::ConnectionId;

/// Why a connection reached `Closed`.
#[derive(Debug)]
enum CloseReason {
    /// Peer closed or reset the stream.
    PeerClosed,
    /// Bad frame or I/O failure mid-frame.
    Frame(FrameError),
    /// [`ServerHandle::disconnect`] or server shutdown.
    Local,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Frame(e) => write!(f, "{e}"),
            Self::Local => write!(f, "closed locally"),
        }
    }
}

impl From<FrameError> for CloseReason {
    fn from(e: FrameError) -> Self {
        if e.is_disconnect() {
            Self::PeerClosed
        } else {
            Self::Frame(e)
        }
    }
}

/// Drive one accepted connection from handshake to close.
pub(super) async fn run(handle: ServerHandle, id: ConnectionId, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("[Server] Could not disable Nagle for conn {}: {e}", id);
    }
    let (mut reader, mut write_half) = stream.into_split();

    // Handshaking
    if let Err(e) = write_half.write_all(&encode_handshake(id)).await {
        log::warn!("[Server] Handshake with {} (conn {}) failed: {e}", peer, id);
        return;
    }

    let shared = handle.shared();
    let (writer, _write_task) = StreamWriter::spawn(id, "Server", write_half);
    let close = shared.shutdown.child_token();
    let entry = StreamEntry::new(writer, close.clone(), shared.config.handler_workers);
    let workers = Arc::clone(&entry.workers);
    shared.streams.insert(id, entry);
    log::info!("[Server] Conn {} connected from {}", id, peer);

    if let Some(on_connect) = &shared.on_connect {
        on_connect(&handle, id);
    }

    // Active
    let reason = dispatch(&handle, id, &mut reader, &close, &workers).await;

    // Closed
    shared.streams.remove(id);
    shared.datagrams.remove(id);
    match &reason {
        CloseReason::Frame(_) => log::warn!("[Server] Conn {} lost: {}", id, reason),
        _ => log::info!("[Server] Conn {} lost: {}", id, reason),
    }

    if let Some(on_disconnect) = &shared.on_disconnect {
        on_disconnect(&handle, id);
    }
}

/// Read frames until the connection closes.
async fn dispatch(
    handle: &ServerHandle,
    id: ConnectionId,
    reader: &mut OwnedReadHalf,
    close: &CancellationToken,
    workers: &Arc<Semaphore>,
) -> CloseReason {
    let shared = handle.shared();
    let max_frame_size = shared.config.max_frame_size;

    loop {
        let frame = tokio::select! {
            () = close.cancelled() => return CloseReason::Local,
            read = read_stream_frame(reader, max_frame_size) => match read {
                Ok(frame) => frame,
                Err(e) => return e.into(),
            },
        };

        if frame.message_type == REGISTER_DATAGRAM {
            log::debug!("[Server] Conn {} sent datagram registration over stream, ignoring", id);
            continue;
        }

        let Some(handler) = shared.handlers.get(frame.message_type) else {
            log::warn!("[Server] No handler with id {} (conn {})", frame.message_type, id);
            continue;
        };

        let permit = tokio::select! {
            () = close.cancelled() => return CloseReason::Local,
            permit = Arc::clone(workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => return CloseReason::Local,
            },
        };

        invoke(handle, handler, id, frame.message_type, frame.payload, permit);
    }
}
