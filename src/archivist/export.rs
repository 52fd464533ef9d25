use crate::model::Tick;

/// Renders ticks as CSV bytes (header + rows). Parquet export from the
/// original service is dropped here — no columnar crate is part of the
/// aligned dependency stack; see `DESIGN.md`.
pub fn ticks_to_csv(symbol: &str, ticks: &[Tick]) -> Vec<u8> {
    let mut out = String::from("symbol,trade_id,price,qty,timestamp,is_buyer_maker\n");
    for tick in ticks {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            symbol,
            tick.trade_id,
            tick.price,
            tick.qty,
            tick.timestamp_ms,
            if tick.is_buyer_maker { 1 } else { 0 },
        ));
    }
    out.into_bytes()
}

pub fn ticks_to_json(symbol: &str, ticks: &[Tick]) -> crate::error::Result<Vec<u8>> {
    let rows: Vec<serde_json::Value> = ticks
        .iter()
        .map(|t| {
            serde_json::json!({
                "symbol": symbol,
                "trade_id": t.trade_id,
                "price": t.price,
                "qty": t.qty,
                "timestamp": t.timestamp_ms,
                "is_buyer_maker": t.is_buyer_maker,
            })
        })
        .collect();
    serde_json::to_vec(&rows)
        .map_err(|e| crate::error::PipelineError::Parse(format!("export serialization error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tick() -> Tick {
        Tick {
            trade_id: 1,
            price: 100.0,
            qty: 0.5,
            timestamp_ms: 1_700_000_000_000,
            is_buyer_maker: true,
        }
    }

    #[test]
    fn csv_export_has_header_and_one_row_per_tick() {
        let csv = ticks_to_csv("BTCUSDT", &[sample_tick(), sample_tick()]);
        let text = String::from_utf8(csv).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("symbol,trade_id"));
    }

    #[test]
    fn json_export_round_trips_field_count() {
        let json = ticks_to_json("BTCUSDT", &[sample_tick()]).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }
}
