//! Tunables for servers and clients.
//!
//! Nothing here is read from disk or the environment. The structs derive
//! serde so a host application can embed them in its own configuration, and
//! every field falls back to the defaults in [`crate::constants`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HANDLER_WORKERS, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_PACKET_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS,
};

/// Fixed-delay retry policy for client transport establishment.
///
/// The first attempt is made immediately; after a failure the client waits
/// `delay_ms` and tries again, at most `max_retries` more times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay between attempts, in milliseconds.
    pub delay_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Total number of attempts, first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Server tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest datagram payload read from clients.
    pub max_packet_size: usize,
    /// Largest stream frame payload accepted from clients.
    pub max_frame_size: u32,
    /// Handler invocations one connection may have running at once.
    pub handler_workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handler_workers: DEFAULT_HANDLER_WORKERS,
        }
    }
}

/// Client tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Largest datagram payload read from the server.
    pub max_packet_size: usize,
    /// Largest stream frame payload accepted from the server.
    pub max_frame_size: u32,
    /// Retry policy shared by the stream and datagram connect steps.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}
