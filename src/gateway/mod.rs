//! Gateway module
//!
//! Owns the subscriber registry and the producer slot behind a single lock and
//! routes every inbound message through the classifier, normalizer and
//! broadcaster.

mod broadcast;
mod classifier;
mod registry;
mod server;

pub use broadcast::{broadcast, relay, BroadcastReport};
pub use classifier::{classify, ConnectionRole, Decision, ProducerSlot, RoleEvent};
pub use registry::ConnectionRegistry;
pub use server::{create_router, GatewayServer};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;
use crate::model::{MarketUpdate, OutboundMessage};
use crate::normalizer::{normalize, Normalized};
use crate::parser::InboundMessage;

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Frame queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-serialized JSON text, shared across all recipients of a broadcast
    Text(Arc<str>),
    Ping,
    Pong(Vec<u8>),
    Close,
}

/// Cheap, cloneable reference to a live connection's outbound side
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle with a bounded outbound queue
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            id,
            tx,
            shutdown: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting; fails if the queue is full or closed
    pub fn try_send(&self, frame: Outbound) -> Result<()> {
        self.tx
            .try_send(frame)
            .map_err(|_| RelayError::ChannelClosed(self.id))
    }

    /// Ask the connection to shut down: queue a Close frame and wake its reader
    pub fn close(&self) {
        let _ = self.tx.try_send(Outbound::Close);
        self.shutdown.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.shutdown.notified().await
    }
}

/// Per-connection state owned by the connection task
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    role: ConnectionRole,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Normalized and fanned out as `market_data`
    Broadcast(BroadcastReport),
    /// Relayed verbatim
    Relayed(BroadcastReport),
    /// Dropped
    Ignored,
}

#[derive(Debug, Default)]
struct GatewayState {
    registry: ConnectionRegistry,
    producer: ProducerSlot,
}

/// Shared gateway: registry, producer slot and metrics for one listener
pub struct Gateway {
    config: Config,
    state: Mutex<GatewayState>,
    next_id: AtomicU64,
    metrics: RelayMetrics,
}

impl Gateway {
    /// Create a gateway with an empty registry and no producer
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            config,
            state: Mutex::new(GatewayState::default()),
            next_id: AtomicU64::new(1),
            metrics: RelayMetrics::new()?,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Allocate a session for a newly accepted socket
    ///
    /// The returned receiver must be drained by the connection's writer task.
    pub fn accept(&self) -> (Session, mpsc::Receiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, rx) = ConnectionHandle::new(id, self.config.subscriber_queue);
        self.metrics.connections_total.inc();

        let session = Session {
            handle,
            role: ConnectionRole::Unclassified,
        };
        (session, rx)
    }

    /// Send the welcome frame and register the session as a provisional subscriber
    pub async fn connect(&self, session: &mut Session) -> Result<()> {
        let welcome = serde_json::to_string(&OutboundMessage::welcome())
            .map_err(|e| RelayError::Serialization(e.to_string()))?;
        session.handle.try_send(Outbound::Text(welcome.into()))?;

        let mut state = self.state.lock().await;
        state.registry.add(session.handle.clone());
        session.role = session.role.on(RoleEvent::Registered);
        self.metrics.subscribers.set(state.registry.count() as i64);

        info!(
            connection_id = session.id(),
            subscribers = state.registry.count(),
            "Connection registered as subscriber"
        );
        Ok(())
    }

    /// Parse and dispatch one text frame
    ///
    /// Malformed frames are counted and returned as errors; the caller keeps the
    /// connection open.
    pub async fn handle_text(&self, session: &mut Session, raw: &str) -> Result<Dispatch> {
        let message = InboundMessage::parse(raw).map_err(|e| {
            self.metrics.malformed_frames.inc();
            e
        })?;
        self.dispatch(session, message).await
    }

    /// Route one decoded message according to the sender's role
    pub async fn dispatch(&self, session: &mut Session, message: InboundMessage) -> Result<Dispatch> {
        let decision = classify(session.role, &message);
        if decision == Decision::Ignore {
            return Ok(Dispatch::Ignored);
        }

        let normalized = normalize(message);
        let mut state = self.state.lock().await;

        // Frames still in flight from a displaced producer, of any shape
        if session.role == ConnectionRole::Producer && !state.producer.is_held_by(session.id()) {
            debug!(connection_id = session.id(), "Dropping message from displaced producer");
            session.role = session.role.on(RoleEvent::Displaced);
            return Ok(Dispatch::Ignored);
        }

        if decision == Decision::Promote {
            self.promote(&mut state, session);
        }

        match normalized {
            Normalized::Update(update) => {
                let report = broadcast(&mut state.registry, &update)?;
                self.record_fan_out(&state, &report);
                self.metrics.updates_broadcast.inc();
                Ok(Dispatch::Broadcast(report))
            }
            Normalized::PassThrough(value) => {
                if !self.config.relay_opaque {
                    return Ok(Dispatch::Ignored);
                }
                let report = relay(&mut state.registry, &value, session.id())?;
                self.record_fan_out(&state, &report);
                self.metrics.opaque_relayed.inc();
                Ok(Dispatch::Relayed(report))
            }
        }
    }

    /// Broadcast an update to all current subscribers
    pub async fn broadcast(&self, update: &MarketUpdate) -> Result<BroadcastReport> {
        let mut state = self.state.lock().await;
        let report = broadcast(&mut state.registry, update)?;
        self.record_fan_out(&state, &report);
        Ok(report)
    }

    /// Tear down a session: unregister it and clear the producer slot if it held it
    pub async fn disconnect(&self, session: &mut Session) {
        let mut state = self.state.lock().await;
        state.registry.remove(session.id());
        if state.producer.release(session.id()) {
            info!(connection_id = session.id(), "Producer disconnected, slot cleared");
        }
        session.role = session.role.on(RoleEvent::Disconnected);
        self.metrics.subscribers.set(state.registry.count() as i64);

        info!(
            connection_id = session.id(),
            subscribers = state.registry.count(),
            "Connection closed"
        );
    }

    /// Current subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.registry.count()
    }

    /// Connection currently holding the producer slot
    pub async fn producer(&self) -> Option<ConnectionId> {
        self.state.lock().await.producer.holder()
    }

    fn promote(&self, state: &mut GatewayState, session: &mut Session) {
        state.registry.remove(session.id());
        session.role = session.role.on(RoleEvent::ProducerMessage);

        if let Some(previous) = state.producer.claim(session.handle.clone()) {
            warn!(
                previous = previous.id(),
                connection_id = session.id(),
                "Producer takeover, closing previous producer"
            );
            previous.close();
            self.metrics.producer_takeovers.inc();
        } else {
            info!(connection_id = session.id(), "Connection promoted to producer");
        }
        self.metrics.subscribers.set(state.registry.count() as i64);
    }

    fn record_fan_out(&self, state: &GatewayState, report: &BroadcastReport) {
        if !report.evicted.is_empty() {
            self.metrics
                .subscribers_evicted
                .inc_by(report.evicted.len() as u64);
            self.metrics.subscribers.set(state.registry.count() as i64);
        }
    }
}
