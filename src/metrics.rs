//! Prometheus metrics for one gateway instance
//!
//! Each gateway owns its own registry so several can coexist in one process.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{RelayError, Result};

/// Gateway counters and gauges
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    pub connections_total: IntCounter,
    pub subscribers: IntGauge,
    pub producer_takeovers: IntCounter,
    pub updates_broadcast: IntCounter,
    pub opaque_relayed: IntCounter,
    pub subscribers_evicted: IntCounter,
    pub malformed_frames: IntCounter,
}

impl RelayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "relay_connections_total",
            "WebSocket connections accepted",
        )?;
        let subscribers = IntGauge::new("relay_subscribers", "Currently registered subscribers")?;
        let producer_takeovers = IntCounter::new(
            "relay_producer_takeovers_total",
            "Producer slot handovers that closed a previous producer",
        )?;
        let updates_broadcast = IntCounter::new(
            "relay_updates_broadcast_total",
            "Canonical updates fanned out",
        )?;
        let opaque_relayed = IntCounter::new(
            "relay_opaque_relayed_total",
            "Unrecognized messages relayed verbatim",
        )?;
        let subscribers_evicted = IntCounter::new(
            "relay_subscribers_evicted_total",
            "Subscribers dropped after a failed or blocked write",
        )?;
        let malformed_frames = IntCounter::new(
            "relay_malformed_frames_total",
            "Inbound frames that were not valid JSON",
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(subscribers.clone()))?;
        registry.register(Box::new(producer_takeovers.clone()))?;
        registry.register(Box::new(updates_broadcast.clone()))?;
        registry.register(Box::new(opaque_relayed.clone()))?;
        registry.register(Box::new(subscribers_evicted.clone()))?;
        registry.register(Box::new(malformed_frames.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            subscribers,
            producer_takeovers,
            updates_broadcast,
            opaque_relayed,
            subscribers_evicted,
            malformed_frames,
        })
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| RelayError::Metrics(e.to_string()))
    }
}
