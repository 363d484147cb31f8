//! Parser module for inbound relay frames
//!
//! Decodes raw producer/subscriber frames into a typed message at the boundary
//! so the normalizer never works on untyped maps.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::error::{RelayError, Result};
use crate::model::MarketUpdate;

/// Quote block of a producer tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub spread: Option<Decimal>,
    /// Event time in Unix seconds
    pub timestamp: Option<f64>,
}

/// Bar block of a producer tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bar {
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
}

/// Raw producer tick: `{"type":"tick","symbol":..,"tick":{..},"candle":{..},"micro":..}`
#[derive(Debug, Clone, PartialEq)]
pub struct TickMessage {
    pub symbol: String,
    pub quote: Quote,
    pub bar: Option<Bar>,
    /// Candle block as received
    pub candle: Option<Value>,
    /// Micro-structure block as received
    pub micro: Option<Value>,
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Producer tick that still needs normalizing
    Tick(TickMessage),
    /// `{"type":"market_data","data":..}` whose payload is already canonical
    MarketData(MarketUpdate),
    /// Anything else; relayed as-is, never used for classification
    Opaque(Value),
}

impl InboundMessage {
    /// Parse a raw text frame
    ///
    /// Only non-JSON input is an error; valid JSON of an unknown shape is `Opaque`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RelayError::Parse(e.to_string()))?;
        Ok(Self::from_value(value))
    }

    /// Classify an already-parsed JSON value
    pub fn from_value(value: Value) -> Self {
        let kind = value
            .get("type")
            .map(|t| t.as_str().unwrap_or_default().to_string());

        match kind.as_deref() {
            Some("tick") | None => match TickMessage::from_value(&value) {
                Some(tick) => InboundMessage::Tick(tick),
                None => InboundMessage::Opaque(value),
            },
            Some("market_data") => {
                let update = value
                    .get("data")
                    .cloned()
                    .and_then(|data| serde_json::from_value::<MarketUpdate>(data).ok())
                    .filter(MarketUpdate::is_valid);
                match update {
                    Some(update) => InboundMessage::MarketData(update),
                    None => InboundMessage::Opaque(value),
                }
            }
            _ => InboundMessage::Opaque(value),
        }
    }

    /// Whether this message marks its sender as the producer
    pub fn is_producer_shaped(&self) -> bool {
        !matches!(self, InboundMessage::Opaque(_))
    }
}

impl TickMessage {
    /// Requires a non-empty symbol and at least one of the `tick`/`candle` objects
    fn from_value(value: &Value) -> Option<Self> {
        let symbol = value.get("symbol")?.as_str()?;
        if symbol.is_empty() {
            return None;
        }

        let tick = value.get("tick").filter(|v| v.is_object());
        let candle = value.get("candle").filter(|v| v.is_object());
        if tick.is_none() && candle.is_none() {
            return None;
        }

        let quote = tick
            .map(|t| Quote {
                bid: price_field(t, "bid"),
                ask: price_field(t, "ask"),
                mid: price_field(t, "mid"),
                spread: price_field(t, "spread"),
                timestamp: t.get("timestamp").and_then(parse_timestamp),
            })
            .unwrap_or_default();

        let bar = candle.map(|c| Bar {
            open: price_field(c, "open"),
            high: price_field(c, "high"),
            low: price_field(c, "low"),
            close: price_field(c, "close"),
        });

        Some(Self {
            symbol: symbol.to_string(),
            quote,
            bar,
            candle: candle.cloned(),
            micro: value.get("micro").cloned(),
        })
    }
}

/// Read a price leniently: numbers and numeric strings are accepted, anything
/// else (including negative values) counts as absent
fn price_field(block: &Value, key: &str) -> Option<Decimal> {
    let price = match block.get(key)? {
        Value::Number(n) => decimal_from_f64(n.as_f64()?),
        Value::String(s) => decimal_from_str(s.trim()),
        _ => None,
    }?;
    (price >= Decimal::ZERO).then_some(price)
}

/// Plain or scientific notation (`"1.085"`, `"1.085e0"`)
fn decimal_from_str(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

fn parse_timestamp(value: &Value) -> Option<f64> {
    let ts = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (ts.is_finite() && ts > 0.0).then_some(ts)
}
