//! Market Relay - market data fan-out gateway
//!
//! Accepts a single price-tick producer and any number of subscribers on one
//! WebSocket endpoint, tells them apart by what they send, normalizes producer
//! payloads into one canonical update and broadcasts it to every subscriber.

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod parser;

pub use crate::config::Config;
pub use crate::error::{RelayError, Result};
pub use crate::gateway::{
    ConnectionRegistry, ConnectionRole, Dispatch, Gateway, GatewayServer, ProducerSlot,
};
pub use crate::metrics::RelayMetrics;
pub use crate::model::{MarketUpdate, OutboundMessage};
pub use crate::normalizer::{normalize, Normalized};
pub use crate::parser::{InboundMessage, TickMessage};
