//! Normalizer: decoded producer payload -> canonical market update
//!
//! Pure functions, no I/O. Defaulting rules:
//! - `mid`/`spread` derive from bid/ask when both are positive, else `0`;
//!   a mid that overflows `Decimal` is not derivable and also becomes `0`
//! - open/high/low/close default to `mid` when the candle value is missing or zero
//! - a missing timestamp becomes the receive time

use rust_decimal::Decimal;
use serde_json::Value;

use crate::model::{empty_object, MarketUpdate};
use crate::parser::{InboundMessage, TickMessage};

/// Result of normalizing one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Canonical update ready for fan-out
    Update(MarketUpdate),
    /// Unrecognized shape, relayed unchanged
    PassThrough(Value),
}

/// Normalize using the current wall clock as receive time
pub fn normalize(message: InboundMessage) -> Normalized {
    normalize_at(message, now_secs())
}

/// Normalize with an explicit receive time (Unix seconds)
pub fn normalize_at(message: InboundMessage, received_at: f64) -> Normalized {
    match message {
        InboundMessage::Tick(tick) => Normalized::Update(normalize_tick(tick, received_at)),
        InboundMessage::MarketData(update) => Normalized::Update(update),
        InboundMessage::Opaque(value) => Normalized::PassThrough(value),
    }
}

/// Build a canonical update from a producer tick
pub fn normalize_tick(tick: TickMessage, received_at: f64) -> MarketUpdate {
    let quote = tick.quote;
    let bid = quote.bid.unwrap_or(Decimal::ZERO);
    let ask = quote.ask.unwrap_or(Decimal::ZERO);
    let both_sides = bid > Decimal::ZERO && ask > Decimal::ZERO;

    let mid = quote.mid.unwrap_or_else(|| {
        if both_sides {
            derive_mid(bid, ask).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    });
    // A crossed book would produce a negative spread
    let spread = quote.spread.unwrap_or_else(|| {
        if both_sides {
            (ask - bid).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    });

    let bar = tick.bar.unwrap_or_default();
    let or_mid = |v: Option<Decimal>| v.filter(|p| *p > Decimal::ZERO).unwrap_or(mid);

    MarketUpdate {
        symbol: tick.symbol,
        bid,
        ask,
        mid,
        spread,
        open: or_mid(bar.open),
        high: or_mid(bar.high),
        low: or_mid(bar.low),
        close: or_mid(bar.close),
        micro: tick.micro.unwrap_or_else(empty_object),
        candle: tick.candle.unwrap_or_else(empty_object),
        timestamp: quote.timestamp.unwrap_or(received_at),
    }
}

fn derive_mid(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    bid.checked_add(ask)?.checked_div(Decimal::from(2))
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutboundMessage;
    use rust_decimal_macros::dec;

    fn parse(raw: &str) -> InboundMessage {
        InboundMessage::parse(raw).unwrap()
    }

    fn update(n: Normalized) -> MarketUpdate {
        match n {
            Normalized::Update(update) => update,
            Normalized::PassThrough(v) => panic!("Expected Update, got {}", v),
        }
    }

    #[test]
    fn test_derives_mid_spread_and_bar() {
        let msg = parse(r#"{"type":"tick","symbol":"EURUSD","tick":{"bid":1.1000,"ask":1.1002}}"#);
        let update = update(normalize_at(msg, 1_700_000_000.0));

        assert_eq!(update.mid, dec!(1.1001));
        assert_eq!(update.spread, dec!(0.0002));
        assert_eq!(update.open, dec!(1.1001));
        assert_eq!(update.high, dec!(1.1001));
        assert_eq!(update.low, dec!(1.1001));
        assert_eq!(update.close, dec!(1.1001));
        assert_eq!(update.candle, serde_json::json!({}));
    }

    #[test]
    fn test_one_sided_quote_defaults_to_zero() {
        let msg = parse(r#"{"type":"tick","symbol":"EURUSD","tick":{"bid":1.1}}"#);
        let update = update(normalize_at(msg, 1.0));

        assert_eq!(update.bid, dec!(1.1));
        assert_eq!(update.ask, Decimal::ZERO);
        assert_eq!(update.mid, Decimal::ZERO);
        assert_eq!(update.spread, Decimal::ZERO);
        assert_eq!(update.close, Decimal::ZERO);
    }

    #[test]
    fn test_explicit_mid_and_candle_win() {
        let msg = parse(
            r#"{"type":"tick","symbol":"XAUUSD",
                "tick":{"bid":2000,"ask":2001,"mid":2000.4,"spread":1.2},
                "candle":{"open":1990,"high":2010,"low":0,"close":"bad"}}"#,
        );
        let update = update(normalize_at(msg, 1.0));

        assert_eq!(update.mid, dec!(2000.4));
        assert_eq!(update.spread, dec!(1.2));
        assert_eq!(update.open, dec!(1990));
        assert_eq!(update.high, dec!(2010));
        assert_eq!(update.low, dec!(2000.4));
        assert_eq!(update.close, dec!(2000.4));
        assert_eq!(update.candle["high"], 2010);
    }

    #[test]
    fn test_missing_timestamp_uses_receive_time() {
        let msg = parse(r#"{"type":"tick","symbol":"EURUSD","tick":{"bid":1.0,"ask":1.1}}"#);
        let before = now_secs();
        let update = update(normalize(msg));

        assert!((update.timestamp - before).abs() < 5.0);
    }

    #[test]
    fn test_producer_timestamp_is_kept() {
        let msg = parse(
            r#"{"type":"tick","symbol":"EURUSD","tick":{"bid":1.0,"ask":1.1,"timestamp":1600000000.5}}"#,
        );
        let update = update(normalize_at(msg, 1_700_000_000.0));
        assert_eq!(update.timestamp, 1_600_000_000.5);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let raw = r#"{"type":"tick","symbol":"EURUSD",
            "tick":{"bid":1.0850,"ask":1.0852},
            "candle":{"open":1.08,"high":1.09,"low":1.07,"close":1.0851},
            "micro":{"ofi":-0.2}}"#;
        let once = update(normalize(parse(raw)));

        let wire = serde_json::to_string(&OutboundMessage::MarketData { data: &once }).unwrap();
        let twice = update(normalize(parse(&wire)));

        assert_eq!(once, twice);
    }

    #[test]
    fn test_huge_quote_does_not_overflow() {
        let msg = parse(r#"{"type":"tick","symbol":"EURUSD","tick":{"bid":7e28,"ask":7e28}}"#);
        assert!(matches!(msg, InboundMessage::Tick(_)));

        let update = update(normalize_at(msg, 1.0));
        assert_eq!(update.mid, Decimal::ZERO);
        assert_eq!(update.spread, Decimal::ZERO);
        assert_eq!(update.open, Decimal::ZERO);
        assert_eq!(update.bid, update.ask);
        assert!(update.is_valid());
    }

    #[test]
    fn test_max_decimal_quotes() {
        let max = Decimal::MAX.to_string();
        let raw = format!(
            r#"{{"symbol":"XAUUSD","tick":{{"bid":"{}","ask":"{}"}},"candle":{{"high":"{}"}}}}"#,
            max, max, max
        );
        let update = update(normalize_at(parse(&raw), 1.0));

        assert_eq!(update.bid, Decimal::MAX);
        assert_eq!(update.mid, Decimal::ZERO);
        assert_eq!(update.high, Decimal::MAX);
        assert_eq!(update.low, Decimal::ZERO);
    }

    #[test]
    fn test_large_but_summable_quote_derives_mid() {
        let msg = parse(r#"{"type":"tick","symbol":"BTCUSD","tick":{"bid":"1e20","ask":"3e20"}}"#);
        let update = update(normalize_at(msg, 1.0));

        assert_eq!(update.mid, dec!(200000000000000000000));
        assert_eq!(update.spread, dec!(200000000000000000000));
    }

    #[test]
    fn test_opaque_passes_through_unchanged() {
        let raw = r#"{"type":"news","headline":"rates unchanged"}"#;
        let expected: Value = serde_json::from_str(raw).unwrap();

        assert_eq!(
            normalize(parse(raw)),
            Normalized::PassThrough(expected)
        );
    }
}
