//! Frame codec for the stream and datagram transports.
//!
//! Encoding is pure. Decoding never fails on well-formed input and reports a
//! [`FrameError`] on truncated input. The stream has no resynchronisation, so
//! any error from [`read_stream_frame`] is fatal to that connection.

use std::fmt;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ConnectionId, MessageType};

/// Stream frame header: message type + payload length.
pub const STREAM_HEADER_LEN: usize = 8;

/// Datagram header sent by the server: message type.
pub const DATAGRAM_HEADER_LEN: usize = 4;

/// Datagram header sent by clients: connection id + message type.
pub const TAGGED_DATAGRAM_HEADER_LEN: usize = 8;

/// Errors produced while decoding frames.
#[derive(Debug)]
pub enum FrameError {
    /// The underlying read failed or hit EOF mid-frame.
    Io(io::Error),
    /// Fewer bytes than the header or declared length requires.
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },
    /// Payload too long for the 32-bit length field.
    PayloadTooLong {
        /// Payload length.
        len: usize,
    },
    /// Declared payload length over the configured limit.
    TooLarge {
        /// Declared length.
        size: u32,
        /// Configured limit.
        max: u32,
    },
}

impl FrameError {
    /// True when the error is the peer going away rather than bad data.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            )
        )
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "frame read failed: {e}"),
            Self::Truncated { needed, have } => {
                write!(f, "truncated frame: need {needed} bytes, have {have}")
            }
            Self::PayloadTooLong { len } => {
                write!(f, "payload of {len} bytes does not fit a stream frame")
            }
            Self::TooLarge { size, max } => {
                write!(f, "frame too large: {size} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// One decoded message: its type and exact payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Application message type.
    pub message_type: MessageType,
    /// Payload, without padding.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }
}

/// Encode a stream frame: `[type][len][payload]`.
///
/// Fails only when the payload length does not fit the `u32` length field.
pub fn encode_stream(message_type: MessageType, payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = stream_payload_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(STREAM_HEADER_LEN + payload.len());
    buf.put_u32(message_type);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Length field for a payload of `len` bytes.
pub fn stream_payload_len(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_overflow| FrameError::PayloadTooLong { len })
}

/// Decode one stream frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied.
pub fn decode_stream(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    if buf.len() < STREAM_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: STREAM_HEADER_LEN,
            have: buf.len(),
        });
    }
    let message_type = read_u32(&buf[0..4]);
    let length = read_u32(&buf[4..8]) as usize;
    let total = STREAM_HEADER_LEN + length;
    if buf.len() < total {
        return Err(FrameError::Truncated {
            needed: total,
            have: buf.len(),
        });
    }
    let frame = Frame::new(message_type, Bytes::copy_from_slice(&buf[STREAM_HEADER_LEN..total]));
    Ok((frame, total))
}

/// Read exactly one stream frame.
///
/// A short read on either header or payload is returned as
/// [`FrameError::Io`] with `UnexpectedEof`.
pub async fn read_stream_frame<R>(reader: &mut R, max_frame_size: u32) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; STREAM_HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let message_type = read_u32(&header[0..4]);
    let length = read_u32(&header[4..8]);
    if length > max_frame_size {
        return Err(FrameError::TooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let mut payload = BytesMut::zeroed(length as usize);
    reader.read_exact(&mut payload).await?;
    Ok(Frame::new(message_type, payload.freeze()))
}

/// Encode the handshake carrying a connection id.
pub fn encode_handshake(id: ConnectionId) -> [u8; 4] {
    id.to_be_bytes()
}

/// Read the handshake written by the server.
pub async fn read_handshake<R>(reader: &mut R) -> Result<ConnectionId, FrameError>
where
    R: AsyncRead + Unpin,
{
    Ok(reader.read_u32().await?)
}

/// Encode a server→client datagram: `[type][payload]`.
pub fn encode_datagram(message_type: MessageType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATAGRAM_HEADER_LEN + payload.len());
    buf.put_u32(message_type);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a server→client datagram.
pub fn decode_datagram(buf: &[u8]) -> Result<Frame, FrameError> {
    if buf.len() < DATAGRAM_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: DATAGRAM_HEADER_LEN,
            have: buf.len(),
        });
    }
    Ok(Frame::new(
        read_u32(&buf[0..4]),
        Bytes::copy_from_slice(&buf[DATAGRAM_HEADER_LEN..]),
    ))
}

/// Encode a client→server datagram: `[id][type][payload]`.
pub fn encode_tagged_datagram(id: ConnectionId, message_type: MessageType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TAGGED_DATAGRAM_HEADER_LEN + payload.len());
    buf.put_u32(id);
    buf.put_u32(message_type);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a client→server datagram into the sender id and frame.
pub fn decode_tagged_datagram(buf: &[u8]) -> Result<(ConnectionId, Frame), FrameError> {
    if buf.len() < TAGGED_DATAGRAM_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: TAGGED_DATAGRAM_HEADER_LEN,
            have: buf.len(),
        });
    }
    let id = read_u32(&buf[0..4]);
    let frame = Frame::new(
        read_u32(&buf[4..8]),
        Bytes::copy_from_slice(&buf[TAGGED_DATAGRAM_HEADER_LEN..]),
    );
    Ok((id, frame))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_layout_is_big_endian() {
        let encoded = encode_stream(0x0102_0304, b"hi").unwrap();
        assert_eq!(&encoded[..], &[1, 2, 3, 4, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_stream_round_trip() {
        let encoded = encode_stream(7, b"hello world").unwrap();
        let (frame, used) = decode_stream(&encoded).unwrap();
        assert_eq!(used, encoded.len());
        assert_eq!(frame, Frame::new(7, &b"hello world"[..]));
    }

    #[test]
    fn test_stream_empty_payload() {
        let encoded = encode_stream(0, &[]).unwrap();
        assert_eq!(encoded.len(), STREAM_HEADER_LEN);
        let (frame, _) = decode_stream(&encoded).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_stream_two_frames_back_to_back() {
        let mut buf = encode_stream(1, b"a").unwrap().to_vec();
        buf.extend_from_slice(&encode_stream(2, b"bc").unwrap());

        let (first, used) = decode_stream(&buf).unwrap();
        let (second, _) = decode_stream(&buf[used..]).unwrap();
        assert_eq!(first.message_type, 1);
        assert_eq!(second, Frame::new(2, &b"bc"[..]));
    }

    #[test]
    fn test_stream_truncated_header() {
        let err = decode_stream(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { needed: 8, have: 3 }));
    }

    #[test]
    fn test_stream_truncated_payload() {
        let encoded = encode_stream(1, b"abcdef").unwrap();
        let err = decode_stream(&encoded[..10]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { needed: 14, have: 10 }));
    }

    #[test]
    fn test_datagram_round_trip() {
        let encoded = encode_datagram(9, b"pos");
        assert_eq!(&encoded[..4], &[0, 0, 0, 9]);
        assert_eq!(decode_datagram(&encoded).unwrap(), Frame::new(9, &b"pos"[..]));
    }

    #[test]
    fn test_tagged_datagram_round_trip() {
        let encoded = encode_tagged_datagram(42, 3, b"xyz");
        assert_eq!(&encoded[..8], &[0, 0, 0, 42, 0, 0, 0, 3]);
        let (id, frame) = decode_tagged_datagram(&encoded).unwrap();
        assert_eq!(id, 42);
        assert_eq!(frame, Frame::new(3, &b"xyz"[..]));
    }

    #[test]
    fn test_register_sentinel_datagram() {
        let encoded = encode_tagged_datagram(5, crate::constants::REGISTER_DATAGRAM, &[]);
        assert_eq!(&encoded[..], &[0, 0, 0, 5, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_short_datagrams_rejected() {
        assert!(decode_datagram(&[1, 2]).is_err());
        assert!(decode_tagged_datagram(&[0, 0, 0, 1, 0]).is_err());
    }

    #[tokio::test]
    async fn test_read_stream_frame_sequence() {
        let mut buf = encode_stream(1, b"first").unwrap().to_vec();
        buf.extend_from_slice(&encode_stream(2, b"second").unwrap());
        let mut reader = &buf[..];

        let a = read_stream_frame(&mut reader, 1024).await.unwrap();
        let b = read_stream_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(a, Frame::new(1, &b"first"[..]));
        assert_eq!(b, Frame::new(2, &b"second"[..]));

        let eof = read_stream_frame(&mut reader, 1024).await.unwrap_err();
        assert!(eof.is_disconnect());
    }

    #[tokio::test]
    async fn test_read_stream_frame_short_payload_is_fatal() {
        let encoded = encode_stream(1, b"abcdef").unwrap();
        let mut reader = &encoded[..10];
        let err = read_stream_frame(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_read_stream_frame_over_limit() {
        let encoded = encode_stream(1, &[0u8; 64]).unwrap();
        let mut reader = &encoded[..];
        let err = read_stream_frame(&mut reader, 16).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size: 64, max: 16 }));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_payload_len_fits_u32() {
        assert_eq!(stream_payload_len(0).unwrap(), 0);
        assert_eq!(stream_payload_len(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_payload_len_over_u32_rejected() {
        let len = u32::MAX as usize + 1;
        let err = stream_payload_len(len).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLong { len: l } if l == len));
        assert!(!err.is_disconnect());
    }

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let bytes = encode_handshake(0xDEAD_BEEF);
        let mut reader = &bytes[..];
        assert_eq!(read_handshake(&mut reader).await.unwrap(), 0xDEAD_BEEF);
    }
}
