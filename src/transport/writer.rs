//! Single-writer discipline for stream sockets.
//!
//! Each stream socket gets one write task fed by an unbounded queue of
//! encoded frames. Senders only enqueue, so concurrent callers (a handler and
//! a broadcast, say) can never interleave partial writes, and frames reach
//! the socket in the order they were queued.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::SendError;
use crate::wire::framing::encode_stream;
use crate::{ConnectionId, MessageType};

/// Cloneable handle that queues frames for one stream socket.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    id: ConnectionId,
    frame_tx: UnboundedSender<Bytes>,
}

impl StreamWriter {
    /// Spawn the write task for `writer` and return its handle.
    ///
    /// The task exits when every `StreamWriter` clone is dropped or a write
    /// fails; it shuts the write half down on the way out so the peer sees EOF.
    pub fn spawn<W>(id: ConnectionId, label: &'static str, writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Bytes>();
        let handle = tokio::spawn(write_loop(id, label, writer, frame_rx));
        (Self { id, frame_tx }, handle)
    }

    /// Encode and queue one frame.
    ///
    /// Returns once the frame is queued; fails if the payload cannot be framed
    /// or the write task is gone.
    pub fn send_frame(&self, message_type: MessageType, payload: &[u8]) -> Result<(), SendError> {
        self.send_raw(encode_stream(message_type, payload)?)
    }

    /// Queue pre-encoded frame bytes.
    pub fn send_raw(&self, encoded: Bytes) -> Result<(), SendError> {
        self.frame_tx
            .send(encoded)
            .map_err(|_unsent| SendError::Closed(self.id))
    }

    /// Connection this writer belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// True once the write task has stopped.
    pub fn is_closed(&self) -> bool {
        self.frame_tx.is_closed()
    }

    /// Writer whose task is already gone.
    #[cfg(test)]
    pub(crate) fn closed(id: ConnectionId) -> Self {
        let (frame_tx, _) = mpsc::unbounded_channel();
        Self { id, frame_tx }
    }
}

/// Write loop — drains the queue into the socket.
async fn write_loop<W>(
    id: ConnectionId,
    label: &'static str,
    mut writer: W,
    mut frame_rx: UnboundedReceiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = frame_rx.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            log::error!("[{}] Write error for conn {}: {e}", label, id);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        log::debug!("[{}] Shutdown of conn {} write half failed: {e}", label, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::framing::read_stream_frame;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_arrive_in_queue_order() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (writer, _task) = StreamWriter::spawn(1, "Test", near);

        writer.send_frame(1, b"A").unwrap();
        writer.send_frame(2, b"B").unwrap();

        let a = read_stream_frame(&mut far, 1024).await.unwrap();
        let b = read_stream_frame(&mut far, 1024).await.unwrap();
        assert_eq!((a.message_type, &a.payload[..]), (1, &b"A"[..]));
        assert_eq!((b.message_type, &b.payload[..]), (2, &b"B"[..]));
    }

    #[tokio::test]
    async fn test_concurrent_senders_never_interleave() {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        let (writer, _task) = StreamWriter::spawn(1, "Test", near);

        let mut tasks = Vec::new();
        for t in 0..8u8 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    writer.send_frame(u32::from(t), &[t; 300]).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for _ in 0..200 {
            let frame = read_stream_frame(&mut far, 1024).await.unwrap();
            assert_eq!(frame.payload.len(), 300);
            assert!(frame.payload.iter().all(|b| u32::from(*b) == frame.message_type));
        }
    }

    #[tokio::test]
    async fn test_dropping_all_handles_closes_stream() {
        let (near, mut far) = tokio::io::duplex(1024);
        let (writer, task) = StreamWriter::spawn(3, "Test", near);
        writer.send_frame(1, b"last").unwrap();
        drop(writer);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("Timed out waiting for write task")
            .unwrap();

        let frame = read_stream_frame(&mut far, 1024).await.unwrap();
        assert_eq!(&frame.payload[..], b"last");
        assert!(read_stream_frame(&mut far, 1024).await.unwrap_err().is_disconnect());
    }

    #[test]
    fn test_closed_writer_reports_connection() {
        let writer = StreamWriter::closed(4);
        assert!(writer.is_closed());
        assert!(matches!(writer.send_frame(1, b"x"), Err(SendError::Closed(4))));
    }
}
