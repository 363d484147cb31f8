//! Canonical market update model
//!
//! The single record every producer payload is normalized into and every
//! subscriber receives.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized, fully populated price update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUpdate {
    /// Instrument identifier (e.g. "EURUSD")
    pub symbol: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub bid: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub ask: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub mid: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub spread: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,

    /// Micro-structure detail, passed through uninterpreted
    #[serde(default = "empty_object")]
    pub micro: Value,

    /// Raw candle block, passed through uninterpreted
    #[serde(default = "empty_object")]
    pub candle: Value,

    /// Event time in Unix seconds
    pub timestamp: f64,
}

impl MarketUpdate {
    /// Check the canonical invariants: non-empty symbol, non-negative prices,
    /// finite timestamp
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.prices().iter().all(|p| *p >= Decimal::ZERO)
            && self.timestamp.is_finite()
    }

    fn prices(&self) -> [Decimal; 8] {
        [
            self.bid, self.ask, self.mid, self.spread, self.open, self.high, self.low,
            self.close,
        ]
    }
}

/// Message sent from the gateway to connected clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage<'a> {
    /// Greeting sent on connect, `ts` in Unix milliseconds
    Welcome { ts: i64 },
    /// Canonical update fan-out
    MarketData { data: &'a MarketUpdate },
}

impl OutboundMessage<'_> {
    /// Welcome frame stamped with the current time
    pub fn welcome() -> Self {
        OutboundMessage::Welcome {
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> MarketUpdate {
        MarketUpdate {
            symbol: "EURUSD".to_string(),
            bid: dec!(1.0850),
            ask: dec!(1.0852),
            mid: dec!(1.0851),
            spread: dec!(0.0002),
            open: dec!(1.0851),
            high: dec!(1.0851),
            low: dec!(1.0851),
            close: dec!(1.0851),
            micro: empty_object(),
            candle: empty_object(),
            timestamp: 1_700_000_000.5,
        }
    }

    #[test]
    fn test_prices_serialize_as_numbers() {
        let json = serde_json::to_value(OutboundMessage::MarketData { data: &sample() }).unwrap();

        assert_eq!(json["type"], "market_data");
        assert_eq!(json["data"]["symbol"], "EURUSD");
        assert_eq!(json["data"]["mid"].as_f64(), Some(1.0851));
        assert_eq!(json["data"]["spread"].as_f64(), Some(0.0002));
    }

    #[test]
    fn test_welcome_shape() {
        let json = serde_json::to_value(OutboundMessage::welcome()).unwrap();
        assert_eq!(json["type"], "welcome");
        assert!(json["ts"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_negative_price_is_invalid() {
        let mut update = sample();
        assert!(update.is_valid());
        update.bid = dec!(-1);
        assert!(!update.is_valid());
    }
}
