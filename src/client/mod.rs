//! Client role: one logical peer of a server, reachable over a stream and a
//! datagram channel.
//!
//! # Connect sequence
//!
//! ```text
//! resolve ─► stream connect (retry) ─► read id ─► stream loop
//!        ─► datagram connect (retry) ─► send registration ─► datagram loop
//! ```
//!
//! The state moves `Idle → Connecting → Handshaking → StreamReady →
//! Connected`; [`ClientHandle::connected`] is true only at the end. Losing the
//! stream ends in `Closed`, losing only the datagram channel falls back to
//! `StreamReady`.

mod dispatch;
mod handle;

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::{TcpStream, UdpSocket};

use crate::config::ClientConfig;
use crate::constants::REGISTER_DATAGRAM;
use crate::transport::retry::with_retry;
use crate::transport::{HandlerRegistry, StreamWriter};
use crate::wire::framing::{encode_tagged_datagram, read_handshake};
use crate::MessageType;

pub use handle::{ClientHandle, ClientState};
use handle::ClientShared;

/// Client-side message handler: the client handle and the exact payload.
///
/// Runs inline on the dispatch loop that received the message, so it
/// delays the next read on that transport until it returns.
pub type ClientHandler = Arc<dyn Fn(&ClientHandle, &[u8]) -> Result<()> + Send + Sync>;

/// A client and its handlers.
pub struct Client {
    handlers: Arc<HandlerRegistry<ClientHandler>>,
    handle: ClientHandle,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("handlers", &self.handlers)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client with default configuration.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Client with explicit configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            handlers: Arc::new(HandlerRegistry::new()),
            handle: ClientHandle::new(config),
        }
    }

    /// Register `handler` for `message_type`. The last registration wins.
    ///
    /// Register before [`Client::connect`]: the dispatch loops keep the
    /// handler set they started with, so later registrations never reach them.
    pub fn register<F>(&mut self, message_type: MessageType, handler: F)
    where
        F: Fn(&ClientHandle, &[u8]) -> Result<()> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.handlers).register(message_type, Arc::new(handler));
    }

    /// Handle for sending and observing state.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// True only while both transports are active.
    pub fn connected(&self) -> bool {
        self.handle.connected()
    }

    /// Connect both transports to the server at `addr` (`host:port`).
    ///
    /// Each transport is retried per the configured [`crate::RetryPolicy`];
    /// once retries run out the error is returned. A stream failure leaves
    /// the client `Closed`; a datagram failure after the stream is up leaves
    /// it `StreamReady` with a working stream, which [`ClientHandle::close`]
    /// tears down. May only be called once.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        let shared = self.handle.shared();
        if !shared.begin_connect() {
            bail!("Client already connected or closed ({:?})", self.handle.state());
        }

        let result = self.establish(addr).await;
        if let Err(e) = &result {
            if shared.current() == ClientState::StreamReady {
                // The stream is up; only the fast path failed.
                log::error!("[Client] Datagram channel to {} failed, stream only: {e:#}", addr);
            } else {
                log::error!("[Client] Connect to {} failed: {e:#}", addr);
                shared.shut();
            }
        }
        result
    }

    async fn establish(&self, addr: &str) -> Result<()> {
        let shared = self.handle.shared();
        let retry = shared.config.retry;
        let server = resolve(addr).await?;

        let stream = with_retry(&retry, "Stream connect", || TcpStream::connect(server)).await?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Client] Could not disable Nagle: {e}");
        }
        if !shared.advance(ClientState::Connecting, ClientState::Handshaking) {
            bail!("Client closed while connecting");
        }

        let (mut reader, write_half) = stream.into_split();
        let id = read_handshake(&mut reader)
            .await
            .context("Failed to read connection id")?;
        if !shared.set_id(id) {
            bail!("Connection id already assigned");
        }
        log::info!("[Client] Connected to {} as conn {}", server, id);

        let (writer, _write_task) = StreamWriter::spawn(id, "Client", write_half);
        shared.attach_stream(writer);
        tokio::spawn(dispatch::stream_loop(
            self.handle.clone(),
            Arc::clone(&self.handlers),
            reader,
        ));
        if !shared.advance(ClientState::Handshaking, ClientState::StreamReady) {
            bail!("Stream closed during handshake");
        }

        let socket = with_retry(&retry, "Datagram connect", || connect_datagram(server)).await?;
        socket
            .send(&encode_tagged_datagram(id, REGISTER_DATAGRAM, &[]))
            .await
            .context("Failed to send datagram registration")?;
        let socket = Arc::new(socket);
        shared.attach_datagram(Arc::clone(&socket));
        tokio::spawn(dispatch::datagram_loop(
            self.handle.clone(),
            Arc::clone(&self.handlers),
            socket,
        ));

        finish_connect(shared)
    }
}

/// Move `StreamReady → Connected` once the datagram loop is running.
///
/// If the datagram channel already dropped again the client stays
/// `StreamReady`: the stream is healthy and the caller can watch the state.
fn finish_connect(shared: &ClientShared) -> Result<()> {
    if shared.promote() {
        return Ok(());
    }
    match shared.current() {
        ClientState::StreamReady => {
            log::warn!("[Client] Datagram channel lost during connect, stream only");
            Ok(())
        }
        state => bail!("Connection lost during connect ({:?})", state),
    }
}

/// First address `addr` resolves to.
async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve {addr}"))?
        .next()
        .ok_or_else(|| anyhow!("No address found for {addr}"))
}

/// Bind an ephemeral datagram socket and connect it to `server`.
///
/// Returns once the socket is writable, so `try_send` works from the first
/// fast send on.
async fn connect_datagram(server: SocketAddr) -> io::Result<UdpSocket> {
    let local = if server.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.writable().await?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_after_handle_shared_keeps_latest() {
        let mut client = Client::new();
        client.register(1, |_, _| Ok(()));
        let running = Arc::clone(&client.handlers);
        client.register(2, |_, _| Ok(()));

        assert_eq!(running.len(), 1);
        assert_eq!(client.handlers.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve("127.0.0.1:4000").await.unwrap();
        assert_eq!(addr.port(), 4000);
    }

    #[tokio::test]
    async fn test_resolve_garbage_fails() {
        assert!(resolve("not an address").await.is_err());
    }

    #[test]
    fn test_datagram_lost_during_connect_keeps_stream() {
        let client = Client::new();
        let shared = client.handle.shared();
        shared.begin_connect();
        shared.advance(ClientState::Connecting, ClientState::StreamReady);
        shared.datagram_lost();

        finish_connect(shared).unwrap();
        assert_eq!(client.handle().state(), ClientState::StreamReady);
        assert!(!shared.close.is_cancelled());
    }

    #[test]
    fn test_finish_after_close_fails() {
        let client = Client::new();
        client.handle().close();
        assert!(finish_connect(client.handle.shared()).is_err());
    }

    #[tokio::test]
    async fn test_stream_only_client_keeps_working() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut server = crate::Server::new();
        server.register(1, move |_, _, payload| {
            tx.send(payload.to_vec())?;
            Ok(())
        });
        let bound = server.bind("127.0.0.1:0").await.unwrap();
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());

        let client = Client::new();
        let mut state = client.handle().subscribe();
        client.connect(&addr.to_string()).await.unwrap();
        assert!(client.connected());

        client.handle.shared().datagram_lost();
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ClientState::StreamReady);
        assert!(!client.connected());
        assert!(matches!(
            client.handle().send_fast(1, b"x"),
            Err(crate::SendError::NotConnected)
        ));

        client.handle().send_safe(1, b"still here").unwrap();
        let got = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out")
            .unwrap();
        assert_eq!(got, b"still here");
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let client = Client::new();
        client.handle().close();
        let err = client.connect("127.0.0.1:1").await.unwrap_err();
        assert!(err.to_string().contains("already connected or closed"));
    }
}
