//! Protocol-wide constants for flera.
//!
//! Defaults for the configurable knobs live here so the config structs and
//! the tests agree on them.

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// Message type reserved for datagram-channel registration.
///
/// The client sends it once, with an empty payload, as soon as its datagram
/// socket is up. The server consumes it before handler lookup.
pub const REGISTER_DATAGRAM: u32 = 0xFFFF_FFFF;

/// Default maximum datagram payload in bytes.
///
/// Datagrams bigger than this are truncated by the socket read and handed to
/// the handler truncated.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024;

/// Default maximum stream frame payload (16 MB).
///
/// A peer announcing a bigger payload is treated as a framing error and the
/// connection is closed.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

// ============================================================================
// Client connect retries
// ============================================================================

/// Fixed delay between connect attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

/// Retries after the first failed attempt before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// ============================================================================
// Server
// ============================================================================

/// Concurrent handler invocations allowed per connection.
pub const DEFAULT_HANDLER_WORKERS: usize = 64;

/// Pause after a failed accept before accepting again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
