use std::collections::HashMap;

use crate::error::{PipelineError, Result};

/// A single normalized trade event from the exchange.
///
/// Immutable once constructed; never mutated after being handed to the
/// broker. Serialized in the broker as string fields (all values
/// convertible back to their native types).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub trade_id: i64,
    pub price: f64,
    pub qty: f64,
    pub timestamp_ms: i64,
    pub is_buyer_maker: bool,
}

impl Tick {
    /// Encodes to the broker's string-field wire representation for a
    /// given symbol. The symbol is carried separately because it is also
    /// the stream key and we don't want to duplicate allocation for it.
    pub fn to_broker_fields(&self, symbol: &str) -> Vec<(String, String)> {
        vec![
            ("symbol".to_string(), symbol.to_uppercase()),
            ("trade_id".to_string(), self.trade_id.to_string()),
            ("price".to_string(), self.price.to_string()),
            ("qty".to_string(), self.qty.to_string()),
            ("timestamp".to_string(), self.timestamp_ms.to_string()),
            (
                "is_buyer_maker".to_string(),
                if self.is_buyer_maker { "1" } else { "0" }.to_string(),
            ),
        ]
    }

    /// Decodes a tick plus its symbol from broker hash fields. Errors are
    /// `PipelineError::Parse`, which hot-path callers log and skip.
    pub fn from_broker_fields(fields: &HashMap<String, String>) -> Result<(String, Tick)> {
        let symbol = fields
            .get("symbol")
            .ok_or_else(|| PipelineError::Parse("missing field: symbol".into()))?
            .to_uppercase();
        let trade_id = fields
            .get("trade_id")
            .ok_or_else(|| PipelineError::Parse("missing field: trade_id".into()))?
            .parse()
            .map_err(|_| PipelineError::Parse("invalid trade_id".into()))?;
        let price = fields
            .get("price")
            .ok_or_else(|| PipelineError::Parse("missing field: price".into()))?
            .parse()
            .map_err(|_| PipelineError::Parse("invalid price".into()))?;
        let qty = fields
            .get("qty")
            .ok_or_else(|| PipelineError::Parse("missing field: qty".into()))?
            .parse()
            .map_err(|_| PipelineError::Parse("invalid qty".into()))?;
        let timestamp_ms = fields
            .get("timestamp")
            .ok_or_else(|| PipelineError::Parse("missing field: timestamp".into()))?
            .parse()
            .map_err(|_| PipelineError::Parse("invalid timestamp".into()))?;
        let is_buyer_maker = fields
            .get("is_buyer_maker")
            .map(|v| v == "1")
            .unwrap_or(false);

        Ok((
            symbol,
            Tick {
                trade_id,
                price,
                qty,
                timestamp_ms,
                is_buyer_maker,
            },
        ))
    }
}

/// OHLC candlestick bar. Supplements the CORE data model (see
/// `SPEC_FULL.md`) for §4.B's `ohlc` table and on-demand computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcBar {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_broker_fields() {
        let tick = Tick {
            trade_id: 42,
            price: 100.5,
            qty: 0.25,
            timestamp_ms: 1_700_000_000_000,
            is_buyer_maker: true,
        };
        let fields: HashMap<String, String> = tick
            .to_broker_fields("btcusdt")
            .into_iter()
            .collect();

        let (symbol, decoded) = Tick::from_broker_fields(&fields).unwrap();
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(decoded, tick);
    }

    #[test]
    fn rejects_missing_fields() {
        let fields = HashMap::new();
        assert!(Tick::from_broker_fields(&fields).is_err());
    }
}
