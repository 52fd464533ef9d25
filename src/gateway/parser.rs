use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::model::Tick;

/// Wire-format event decoding. The exchange's raw JSON schema is isolated
/// behind this trait so a different venue's field layout can be plugged in
/// without touching connection or buffering logic.
pub trait TradeEventParser: Send + Sync {
    /// Returns `Ok(None)` for events that are not trades (discarded
    /// silently per the normalization rule); `Err` on malformed payloads.
    fn parse(&self, raw: &str) -> Result<Option<Tick>>;
}

#[derive(Debug, Deserialize)]
struct BinanceTradeEvent {
    e: String,
    #[allow(dead_code)]
    s: String,
    t: i64,
    p: String,
    q: String,
    #[serde(rename = "T")]
    event_time_ms: i64,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

/// Default parser for the Binance-shaped `e/E/s/t/p/q/T/m` trade schema.
pub struct BinanceTradeParser;

impl TradeEventParser for BinanceTradeParser {
    fn parse(&self, raw: &str) -> Result<Option<Tick>> {
        let event: BinanceTradeEvent = serde_json::from_str(raw)
            .map_err(|e| PipelineError::Parse(format!("invalid trade event: {e}")))?;

        if event.e != "trade" {
            return Ok(None);
        }

        let price: f64 = event
            .p
            .parse()
            .map_err(|_| PipelineError::Parse("invalid price field".into()))?;
        let qty: f64 = event
            .q
            .parse()
            .map_err(|_| PipelineError::Parse("invalid qty field".into()))?;

        Ok(Some(Tick {
            trade_id: event.t,
            price,
            qty,
            timestamp_ms: event.event_time_ms,
            is_buyer_maker: event.is_buyer_maker,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_event() {
        let raw = r#"{"e":"trade","E":1700000000123,"s":"BTCUSDT","t":12345,"p":"50000.5","q":"0.01","T":1700000000100,"m":false}"#;
        let tick = BinanceTradeParser.parse(raw).unwrap().unwrap();
        assert_eq!(tick.trade_id, 12345);
        assert_eq!(tick.price, 50000.5);
        assert_eq!(tick.qty, 0.01);
        assert!(!tick.is_buyer_maker);
    }

    #[test]
    fn discards_non_trade_events() {
        let raw = r#"{"e":"depthUpdate","s":"BTCUSDT","t":0,"p":"0","q":"0","T":0,"m":false}"#;
        assert!(BinanceTradeParser.parse(raw).unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(BinanceTradeParser.parse("not json").is_err());
    }
}
