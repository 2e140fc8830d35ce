//! Errors returned by the send primitives.
//!
//! Lifecycle calls (bind, serve, connect) use `anyhow`; sends return these
//! typed errors so callers can tell an unknown target from a dead one.

use std::fmt;
use std::io;

use crate::wire::FrameError;
use crate::ConnectionId;

/// Failure of a single unicast send.
#[derive(Debug)]
pub enum SendError {
    /// No registry entry for the target on this transport.
    UnknownConnection(ConnectionId),
    /// The entry exists but its writer has already shut down.
    Closed(ConnectionId),
    /// The client transport needed for this send is not up yet.
    NotConnected,
    /// The payload cannot be framed.
    Frame(FrameError),
    /// Local socket send failure.
    Io(io::Error),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConnection(id) => write!(f, "connection {id} unknown"),
            Self::Closed(id) => write!(f, "connection {id} closed"),
            Self::NotConnected => write!(f, "transport not connected"),
            Self::Frame(e) => write!(f, "cannot encode: {e}"),
            Self::Io(e) => write!(f, "send failed: {e}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Frame(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for SendError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<io::Error> for SendError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Joined failures of a multicast or broadcast.
///
/// Every target is attempted once; this carries every failure, in the order
/// the targets were attempted.
#[derive(Debug)]
pub struct MulticastError {
    /// Per-target failures.
    pub failures: Vec<(ConnectionId, SendError)>,
}

impl MulticastError {
    /// Collapse collected failures into a result.
    pub(crate) fn check(failures: Vec<(ConnectionId, SendError)>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self { failures })
        }
    }

    /// Fail every target with the same unframeable payload of `len` bytes.
    pub(crate) fn unencodable(ids: impl IntoIterator<Item = ConnectionId>, len: usize) -> Result<(), Self> {
        Self::check(
            ids.into_iter()
                .map(|id| (id, SendError::Frame(FrameError::PayloadTooLong { len })))
                .collect(),
        )
    }

    /// Ids of the connections that failed.
    pub fn failed_ids(&self) -> Vec<ConnectionId> {
        self.failures.iter().map(|(id, _)| *id).collect()
    }
}

impl fmt::Display for MulticastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (id, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "conn {id}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MulticastError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_failures_is_ok() {
        assert!(MulticastError::check(Vec::new()).is_ok());
    }

    #[test]
    fn test_display_names_every_connection() {
        let err = MulticastError::check(vec![
            (3, SendError::UnknownConnection(3)),
            (7, SendError::Closed(7)),
        ])
        .unwrap_err();

        assert_eq!(err.failed_ids(), vec![3, 7]);
        let msg = err.to_string();
        assert_eq!(msg, "conn 3: connection 3 unknown; conn 7: connection 7 closed");
    }

    #[test]
    fn test_io_error_has_source() {
        let err = SendError::from(io::Error::new(io::ErrorKind::WouldBlock, "full"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn test_unencodable_fails_every_target() {
        let err = MulticastError::unencodable([1, 4], 70_000).unwrap_err();
        assert_eq!(err.failed_ids(), vec![1, 4]);
        assert!(err
            .failures
            .iter()
            .all(|(_, e)| matches!(e, SendError::Frame(FrameError::PayloadTooLong { len: 70_000 }))));
        assert!(MulticastError::unencodable([], 70_000).is_ok());
    }

    #[test]
    fn test_frame_error_has_source() {
        let err = SendError::from(FrameError::PayloadTooLong { len: 70_000 });
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("70000"));
    }
}
