//! Client dispatch loops, one per transport.
//!
//! Handlers run inline, so messages on one transport are handled strictly in
//! arrival order. The stream loop ending closes the whole client; the
//! datagram loop ending only drops the fast path.

use std::io;
use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::UdpSocket;

use super::{ClientHandle, ClientHandler};
use crate::constants::REGISTER_DATAGRAM;
use crate::transport::HandlerRegistry;
use crate::wire::framing::{decode_datagram, read_stream_frame, DATAGRAM_HEADER_LEN};
use crate::wire::Frame;

/// Stream loop — reads frames until the server goes away or the client closes.
pub(super) async fn stream_loop(
    handle: ClientHandle,
    handlers: Arc<HandlerRegistry<ClientHandler>>,
    mut reader: OwnedReadHalf,
) {
    let shared = handle.shared();
    let max_frame_size = shared.config.max_frame_size;

    loop {
        tokio::select! {
            () = shared.close.cancelled() => {
                log::debug!("[Client] Stream loop stopped");
                break;
            }
            read = read_stream_frame(&mut reader, max_frame_size) => match read {
                Ok(frame) => dispatch(&handle, &handlers, &frame, "stream"),
                Err(e) if e.is_disconnect() => {
                    log::info!("[Client] Server closed the stream");
                    break;
                }
                Err(e) => {
                    log::error!("[Client] Stream lost: {e}");
                    break;
                }
            },
        }
    }

    shared.shut();
}

/// Datagram loop — reads datagrams from the connected socket.
pub(super) async fn datagram_loop(
    handle: ClientHandle,
    handlers: Arc<HandlerRegistry<ClientHandler>>,
    socket: Arc<UdpSocket>,
) {
    let shared = handle.shared();
    let mut buf = vec![0u8; shared.config.max_packet_size + DATAGRAM_HEADER_LEN];

    loop {
        let n = tokio::select! {
            () = shared.close.cancelled() => return,
            received = socket.recv(&mut buf) => match received {
                Ok(n) => n,
                // ICMP port-unreachable from a server that is not up yet.
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    log::debug!("[Client] Datagram refused by server: {e}");
                    continue;
                }
                Err(e) => {
                    log::warn!("[Client] Datagram channel lost: {e}");
                    break;
                }
            },
        };

        match decode_datagram(&buf[..n]) {
            Ok(frame) => dispatch(&handle, &handlers, &frame, "datagram"),
            Err(e) => log::debug!("[Client] Dropping malformed datagram: {e}"),
        }
    }

    shared.datagram_lost();
}

fn dispatch(
    handle: &ClientHandle,
    handlers: &HandlerRegistry<ClientHandler>,
    frame: &Frame,
    transport: &str,
) {
    if frame.message_type == REGISTER_DATAGRAM {
        return;
    }
    let Some(handler) = handlers.get(frame.message_type) else {
        log::warn!(
            "[Client] No handler with id {} from {}",
            frame.message_type,
            transport
        );
        return;
    };
    if let Err(e) = handler(handle, &frame.payload) {
        log::warn!(
            "[Client] Handler for message type {} failed: {e:#}",
            frame.message_type
        );
    }
}
