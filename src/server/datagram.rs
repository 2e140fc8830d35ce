//! Shared datagram loop for the server.
//!
//! One task reads every datagram off the bound socket and routes it by the
//! connection id embedded in its header. There is no per-peer state here
//! beyond the id → address binding.
//!
//! Binding policy: a datagram is accepted only while its id has a live
//! stream. The first accepted datagram (normally the registration sentinel)
//! binds the id to its source address; a later one from a different address
//! rebinds it, which tolerates NAT rebinding. The stream task drops the
//! binding when the connection closes.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Semaphore;

use super::handle::ServerShared;
use super::{invoke, ServerHandle};
use crate::constants::REGISTER_DATAGRAM;
use crate::wire::framing::{decode_tagged_datagram, TAGGED_DATAGRAM_HEADER_LEN};
use crate::ConnectionId;

/// Datagram loop — runs until server shutdown.
pub(super) async fn serve(handle: ServerHandle) {
    let shared = handle.shared();
    let mut buf = vec![0u8; shared.config.max_packet_size + TAGGED_DATAGRAM_HEADER_LEN];

    loop {
        let (n, from) = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            received = shared.udp.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    log::debug!("[Datagram] Receive error: {e}");
                    continue;
                }
            },
        };

        let (id, frame) = match decode_tagged_datagram(&buf[..n]) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::debug!("[Datagram] Dropping malformed datagram from {}: {e}", from);
                continue;
            }
        };

        let Some(workers) = bind_address(shared, id, from) else {
            continue;
        };
        if frame.message_type == REGISTER_DATAGRAM {
            continue;
        }

        let Some(handler) = shared.handlers.get(frame.message_type) else {
            log::debug!("[Datagram] No handler with id {} (conn {})", frame.message_type, id);
            continue;
        };

        // Only this connection's slots count; a busy peer never costs the
        // others their datagrams, and this loop never waits.
        let Ok(permit) = workers.try_acquire_owned() else {
            log::debug!("[Datagram] Workers busy, dropping message {} from conn {}", frame.message_type, id);
            continue;
        };
        invoke(&handle, handler, id, frame.message_type, frame.payload, permit);
    }

    log::info!("[Datagram] Loop stopped");
}

/// Validate `id` against the stream registry and record its address.
///
/// Returns the connection's handler slots, or `None` if the datagram must be
/// dropped.
fn bind_address(shared: &ServerShared, id: ConnectionId, from: SocketAddr) -> Option<Arc<Semaphore>> {
    let Some(entry) = shared.streams.get(id) else {
        log::debug!("[Datagram] Dropping datagram for unknown conn {} from {}", id, from);
        return None;
    };
    record_binding(shared, id, from).then_some(entry.workers)
}

/// Write the `id → from` binding unless the stream is gone.
///
/// The stream task removes the stream entry before the binding, so checking
/// the stream again after writing catches a close that landed between the
/// caller's check and this write.
fn record_binding(shared: &ServerShared, id: ConnectionId, from: SocketAddr) -> bool {
    let previous = shared.datagrams.insert(id, from);
    if !shared.streams.contains(id) {
        shared.datagrams.remove(id);
        log::debug!("[Datagram] Conn {} closed while binding {}, dropping", id, from);
        return false;
    }
    match previous {
        None => log::info!("[Datagram] Conn {} bound to {}", id, from),
        Some(previous) if previous != from => {
            log::info!("[Datagram] Conn {} rebound from {} to {}", id, previous, from);
        }
        Some(_) => {}
    }
    true
}
