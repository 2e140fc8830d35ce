//! Message type → handler map.
//!
//! Registration happens before the transport starts. Once dispatch begins the
//! loops share the map through an `Arc` and only read it, so lookups need no
//! lock. Server and client each own their own registry and insert through
//! `&mut self`, which keeps registration and dispatch from overlapping.

use std::collections::HashMap;
use std::fmt;

use crate::constants::REGISTER_DATAGRAM;
use crate::MessageType;

/// Handlers keyed by message type.
///
/// `H` is the role-specific handler type (see [`crate::server::ServerHandler`]
/// and [`crate::client::ClientHandler`]).
#[derive(Clone)]
pub struct HandlerRegistry<H> {
    handlers: HashMap<MessageType, H>,
}

impl<H> HandlerRegistry<H> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `message_type`, replacing any earlier one.
    ///
    /// The reserved datagram-registration type is refused: the core consumes
    /// it before lookup, so a handler for it could never run.
    pub fn register(&mut self, message_type: MessageType, handler: H) {
        if message_type == REGISTER_DATAGRAM {
            log::warn!(
                "Ignoring handler for reserved message type 0x{:08x}",
                message_type
            );
            return;
        }
        if self.handlers.insert(message_type, handler).is_some() {
            log::debug!("Replaced handler for message type {}", message_type);
        }
    }

    /// Handler for `message_type`, if one was registered.
    pub fn get(&self, message_type: MessageType) -> Option<&H> {
        self.handlers.get(&message_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("message_types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(1, "first");
        registry.register(1, "second");
        assert_eq!(registry.get(1), Some(&"second"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_type_is_none() {
        let registry: HandlerRegistry<&str> = HandlerRegistry::new();
        assert!(registry.get(99).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reserved_type_refused() {
        let mut registry = HandlerRegistry::new();
        registry.register(REGISTER_DATAGRAM, "nope");
        assert!(registry.get(REGISTER_DATAGRAM).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_debug_lists_types() {
        let mut registry = HandlerRegistry::new();
        registry.register(4, ());
        registry.register(2, ());
        assert_eq!(
            format!("{registry:?}"),
            "HandlerRegistry { message_types: [2, 4] }"
        );
    }
}
