//! Feed classifier
//!
//! Producer and subscribers share one endpoint with no handshake, so each
//! connection runs a small role state machine driven only by the shape of the
//! messages it sends and by its own lifecycle.

use super::{ConnectionHandle, ConnectionId};
use crate::parser::InboundMessage;

/// Role of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Accepted, welcome not yet sent
    Unclassified,
    /// Registered for broadcasts
    Subscriber,
    /// Holds (or held) the producer slot
    Producer,
    /// Torn down or displaced
    Closed,
}

/// Inputs that move a connection between roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleEvent {
    Registered,
    ProducerMessage,
    OpaqueMessage,
    Displaced,
    Disconnected,
}

impl ConnectionRole {
    /// Apply an event and return the next role
    pub fn on(self, event: RoleEvent) -> ConnectionRole {
        use ConnectionRole::*;

        match (self, event) {
            (Closed, _) | (_, RoleEvent::Disconnected) => Closed,
            (Unclassified, RoleEvent::Registered) => Subscriber,
            (Unclassified | Subscriber | Producer, RoleEvent::ProducerMessage) => Producer,
            (Producer, RoleEvent::Displaced) => Closed,
            (role, _) => role,
        }
    }
}

/// What the gateway should do with one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First producer-shaped message: take the producer slot, then forward
    Promote,
    /// Message from the current producer: normalize and broadcast
    Forward,
    /// Unrecognized shape: relay verbatim, role unchanged
    Relay,
    /// Drop silently
    Ignore,
}

/// Decide how to route a message given the sender's current role
pub fn classify(role: ConnectionRole, message: &InboundMessage) -> Decision {
    match (role, message.is_producer_shaped()) {
        (ConnectionRole::Closed, _) => Decision::Ignore,
        (ConnectionRole::Producer, true) => Decision::Forward,
        (_, true) => Decision::Promote,
        (_, false) => Decision::Relay,
    }
}

/// At most one active producer connection
#[derive(Debug, Default)]
pub struct ProducerSlot {
    current: Option<ConnectionHandle>,
}

impl ProducerSlot {
    /// Id of the connection holding the slot, if any
    pub fn holder(&self) -> Option<ConnectionId> {
        self.current.as_ref().map(ConnectionHandle::id)
    }

    pub fn is_held_by(&self, id: ConnectionId) -> bool {
        self.holder() == Some(id)
    }

    /// Give the slot to `handle`, returning the displaced producer if it was a
    /// different connection
    pub fn claim(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        if self.is_held_by(handle.id()) {
            return None;
        }
        self.current.replace(handle)
    }

    /// Clear the slot if `id` holds it
    pub fn release(&mut self, id: ConnectionId) -> bool {
        if self.is_held_by(id) {
            self.current = None;
            true
        } else {
            false
        }
    }
}
