//! Broadcaster: serialize once, fan out to every registered subscriber
//!
//! Writes are non-blocking pushes onto each connection's bounded queue. A
//! closed or full queue evicts that subscriber without affecting the others.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use super::{ConnectionId, Outbound};
use crate::error::{RelayError, Result};
use crate::model::{MarketUpdate, OutboundMessage};

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the frame was queued for
    pub delivered: usize,
    /// Subscribers removed because their write failed
    pub evicted: Vec<ConnectionId>,
}

/// Broadcast a canonical update as `{"type":"market_data","data":..}`
pub fn broadcast(registry: &mut ConnectionRegistry, update: &MarketUpdate) -> Result<BroadcastReport> {
    if registry.is_empty() {
        return Ok(BroadcastReport::default());
    }

    let frame = serde_json::to_string(&OutboundMessage::MarketData { data: update })
        .map_err(|e| RelayError::Serialization(format!("Failed to serialize: {}", e)))?;

    Ok(fan_out(registry, frame.into(), None))
}

/// Relay an unrecognized message verbatim to every subscriber except its sender
pub fn relay(
    registry: &mut ConnectionRegistry,
    message: &Value,
    sender: ConnectionId,
) -> Result<BroadcastReport> {
    if registry.is_empty() {
        return Ok(BroadcastReport::default());
    }

    let frame = serde_json::to_string(message)
        .map_err(|e| RelayError::Serialization(format!("Failed to serialize: {}", e)))?;

    Ok(fan_out(registry, frame.into(), Some(sender)))
}

fn fan_out(
    registry: &mut ConnectionRegistry,
    frame: Arc<str>,
    skip: Option<ConnectionId>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for handle in registry.iter().filter(|h| Some(h.id()) != skip) {
        match handle.try_send(Outbound::Text(Arc::clone(&frame))) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(connection_id = handle.id(), error = %e, "Dropping subscriber after failed write");
                report.evicted.push(handle.id());
            }
        }
    }

    for id in &report.evicted {
        if let Some(handle) = registry.remove(*id) {
            handle.close();
        }
    }

    debug!(
        delivered = report.delivered,
        evicted = report.evicted.len(),
        "Fan-out complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ConnectionHandle;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn update() -> MarketUpdate {
        MarketUpdate {
            symbol: "EURUSD".to_string(),
            bid: dec!(1.1000),
            ask: dec!(1.1002),
            mid: dec!(1.1001),
            spread: dec!(0.0002),
            open: dec!(1.1001),
            high: dec!(1.1001),
            low: dec!(1.1001),
            close: dec!(1.1001),
            micro: json!({}),
            candle: json!({}),
            timestamp: 1_700_000_000.0,
        }
    }

    fn text(frame: Outbound) -> Value {
        match frame {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_subscriber_is_isolated() {
        let mut registry = ConnectionRegistry::new();
        let (healthy, mut healthy_rx) = ConnectionHandle::new(1, 8);
        let (broken, broken_rx) = ConnectionHandle::new(2, 8);
        drop(broken_rx);
        registry.add(healthy);
        registry.add(broken);

        let report = broadcast(&mut registry, &update()).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![2]);
        assert!(!registry.contains(2));

        let report = broadcast(&mut registry, &update()).unwrap();
        assert_eq!(report.delivered, 1);
        assert!(report.evicted.is_empty());

        let first = text(healthy_rx.try_recv().unwrap());
        assert_eq!(first["type"], "market_data");
        assert_eq!(first["data"]["symbol"], "EURUSD");
        assert!(healthy_rx.try_recv().is_ok());
        assert!(healthy_rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_evicts_slow_subscriber() {
        let mut registry = ConnectionRegistry::new();
        let (slow, _slow_rx) = ConnectionHandle::new(7, 1);
        registry.add(slow);

        assert_eq!(broadcast(&mut registry, &update()).unwrap().delivered, 1);
        let report = broadcast(&mut registry, &update()).unwrap();
        assert_eq!(report.evicted, vec![7]);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_per_subscriber_order_is_fifo() {
        let mut registry = ConnectionRegistry::new();
        let (sub, mut rx) = ConnectionHandle::new(1, 8);
        registry.add(sub);

        for bid in [dec!(1.1), dec!(1.2), dec!(1.3)] {
            let mut u = update();
            u.bid = bid;
            broadcast(&mut registry, &u).unwrap();
        }

        let bids: Vec<f64> = (0..3)
            .map(|_| text(rx.try_recv().unwrap())["data"]["bid"].as_f64().unwrap())
            .collect();
        assert_eq!(bids, vec![1.1, 1.2, 1.3]);
    }

    #[test]
    fn test_empty_registry_is_noop() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(
            broadcast(&mut registry, &update()).unwrap(),
            BroadcastReport::default()
        );
    }

    #[test]
    fn test_relay_skips_sender() {
        let mut registry = ConnectionRegistry::new();
        let (sender, mut sender_rx) = ConnectionHandle::new(1, 8);
        let (other, mut other_rx) = ConnectionHandle::new(2, 8);
        registry.add(sender);
        registry.add(other);

        let message = json!({"type": "news", "headline": "CPI beat"});
        let report = relay(&mut registry, &message, 1).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(text(other_rx.try_recv().unwrap()), message);
        assert!(sender_rx.try_recv().is_err());
    }
}
