//! Client state and send primitives.
//!
//! A client only ever talks to one server, so instead of registries it keeps
//! its own id and direct handles to its two transports. Both handles are
//! taken out on close, which lets the stream writer flush and shut down.

use std::sync::{Arc, Mutex, OnceLock};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::SendError;
use crate::transport::StreamWriter;
use crate::wire::framing::encode_tagged_datagram;
use crate::{ConnectionId, MessageType};

/// Where a client is in its connect sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// `connect` not called yet.
    #[default]
    Idle,
    /// Resolving and connecting the stream, retrying on failure.
    Connecting,
    /// Stream up, waiting for the connection id.
    Handshaking,
    /// Stream active, datagram channel not up (yet, or any more).
    StreamReady,
    /// Both transports active.
    Connected,
    /// Terminal: stream lost, connect failed or closed locally.
    Closed,
}

/// State shared by the client, its handles and its dispatch loops.
#[derive(Debug)]
pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) close: CancellationToken,
    id: OnceLock<ConnectionId>,
    state: watch::Sender<ClientState>,
    stream: Mutex<Option<StreamWriter>>,
    datagram: Mutex<Option<Arc<UdpSocket>>>,
}

impl ClientShared {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            close: CancellationToken::new(),
            id: OnceLock::new(),
            state: watch::Sender::new(ClientState::Idle),
            stream: Mutex::new(None),
            datagram: Mutex::new(None),
        }
    }

    /// Move `Idle → Connecting`. `false` if connect already ran.
    pub(crate) fn begin_connect(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ClientState::Idle {
                *state = ClientState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Move `from → to`; no-op (returning `false`) from any other state.
    pub(crate) fn advance(&self, from: ClientState, to: ClientState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn current(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Move `StreamReady → Connected`, but only while a datagram socket is
    /// attached. `false` if the datagram loop already gave up.
    pub(crate) fn promote(&self) -> bool {
        self.state.send_if_modified(|state| {
            let datagram_up = self
                .datagram
                .lock()
                .expect("Client datagram mutex poisoned")
                .is_some();
            if *state == ClientState::StreamReady && datagram_up {
                *state = ClientState::Connected;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn set_id(&self, id: ConnectionId) -> bool {
        self.id.set(id).is_ok()
    }

    pub(crate) fn attach_stream(&self, writer: StreamWriter) {
        *self.stream.lock().expect("Client stream mutex poisoned") = Some(writer);
    }

    pub(crate) fn attach_datagram(&self, socket: Arc<UdpSocket>) {
        *self.datagram.lock().expect("Client datagram mutex poisoned") = Some(socket);
    }

    /// Datagram loop ended while the stream may still be up.
    pub(crate) fn datagram_lost(&self) {
        self.datagram.lock().expect("Client datagram mutex poisoned").take();
        self.advance(ClientState::Connected, ClientState::StreamReady);
    }

    /// Enter `Closed`: drop both transports and stop both loops.
    pub(crate) fn shut(&self) {
        self.state.send_replace(ClientState::Closed);
        self.close.cancel();
        self.stream.lock().expect("Client stream mutex poisoned").take();
        self.datagram.lock().expect("Client datagram mutex poisoned").take();
    }

    /// Send a datagram tagged with our id, whatever its message type.
    pub(crate) fn send_datagram(&self, message_type: MessageType, payload: &[u8]) -> Result<(), SendError> {
        let id = *self.id.get().ok_or(SendError::NotConnected)?;
        let socket = self
            .datagram
            .lock()
            .expect("Client datagram mutex poisoned")
            .clone()
            .ok_or(SendError::NotConnected)?;
        socket.try_send(&encode_tagged_datagram(id, message_type, payload))?;
        Ok(())
    }
}

/// Cloneable handle to a client, passed to every client handler.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    shared: Arc<ClientShared>,
}

impl ClientHandle {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared::new(config)),
        }
    }

    pub(crate) fn shared(&self) -> &ClientShared {
        &self.shared
    }

    /// Id assigned by the server, once the handshake is done.
    pub fn id(&self) -> Option<ConnectionId> {
        self.shared.id.get().copied()
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.shared.current()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// True only while both transports are active.
    pub fn connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Send one frame to the server over the stream.
    ///
    /// Ordered with respect to other `send_safe` calls.
    pub fn send_safe(&self, message_type: MessageType, payload: &[u8]) -> Result<(), SendError> {
        let writer = self
            .shared
            .stream
            .lock()
            .expect("Client stream mutex poisoned")
            .clone()
            .ok_or(SendError::NotConnected)?;
        writer.send_frame(message_type, payload)
    }

    /// Send one datagram to the server. No ordering, no retry.
    pub fn send_fast(&self, message_type: MessageType, payload: &[u8]) -> Result<(), SendError> {
        self.shared.send_datagram(message_type, payload)
    }

    /// Close both transports. The client cannot be reconnected afterwards.
    pub fn close(&self) {
        if self.state() != ClientState::Closed {
            log::info!("[Client] Closing");
        }
        self.shared.shut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sends_before_connect_fail() {
        let handle = ClientHandle::new(ClientConfig::default());
        assert_eq!(handle.state(), ClientState::Idle);
        assert!(!handle.connected());
        assert!(handle.id().is_none());
        assert!(matches!(handle.send_safe(1, b"x"), Err(SendError::NotConnected)));
        assert!(matches!(handle.send_fast(1, b"x"), Err(SendError::NotConnected)));
    }

    #[test]
    fn test_connect_can_begin_only_once() {
        let handle = ClientHandle::new(ClientConfig::default());
        assert!(handle.shared().begin_connect());
        assert!(!handle.shared().begin_connect());
        assert_eq!(handle.state(), ClientState::Connecting);
    }

    #[test]
    fn test_advance_only_from_expected_state() {
        let handle = ClientHandle::new(ClientConfig::default());
        assert!(!handle.shared().advance(ClientState::StreamReady, ClientState::Connected));
        handle.shared().begin_connect();
        assert!(handle.shared().advance(ClientState::Connecting, ClientState::Handshaking));
        assert_eq!(handle.state(), ClientState::Handshaking);
    }

    #[test]
    fn test_losing_datagram_downgrades_to_stream_ready() {
        let handle = ClientHandle::new(ClientConfig::default());
        handle.shared().begin_connect();
        handle.shared().advance(ClientState::Connecting, ClientState::Connected);
        assert!(handle.connected());

        handle.shared().datagram_lost();
        assert_eq!(handle.state(), ClientState::StreamReady);
        assert!(!handle.connected());
    }

    #[tokio::test]
    async fn test_promote_requires_datagram_socket() {
        let handle = ClientHandle::new(ClientConfig::default());
        handle.shared().begin_connect();
        handle.shared().advance(ClientState::Connecting, ClientState::StreamReady);

        // Datagram loop already ended: stay on the stream alone.
        assert!(!handle.shared().promote());
        assert_eq!(handle.state(), ClientState::StreamReady);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        handle.shared().attach_datagram(Arc::new(socket));
        assert!(handle.shared().promote());
        assert!(handle.connected());
    }

    #[test]
    fn test_close_is_terminal() {
        let handle = ClientHandle::new(ClientConfig::default());
        let mut rx = handle.subscribe();
        handle.close();
        assert_eq!(handle.state(), ClientState::Closed);
        assert!(rx.has_changed().unwrap());
        assert!(!handle.shared().begin_connect());
        assert!(handle.shared().close.is_cancelled());
    }

    #[test]
    fn test_id_is_set_once() {
        let handle = ClientHandle::new(ClientConfig::default());
        assert!(handle.shared().set_id(3));
        assert!(!handle.shared().set_id(4));
        assert_eq!(handle.id(), Some(3));
    }
}
