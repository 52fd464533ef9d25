use std::collections::HashMap;

/// Data validity classification for a rolling window, per the rule
/// `insufficient` iff `tick_count < 20`; `warming_up` iff
/// `20 <= tick_count < window`; else `valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataValidityStatus {
    Insufficient,
    WarmingUp,
    Valid,
}

impl DataValidityStatus {
    pub fn classify(tick_count: usize, window: usize) -> Self {
        if tick_count < 20 {
            DataValidityStatus::Insufficient
        } else if tick_count < window {
            DataValidityStatus::WarmingUp
        } else {
            DataValidityStatus::Valid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataValidityStatus::Insufficient => "insufficient",
            DataValidityStatus::WarmingUp => "warming_up",
            DataValidityStatus::Valid => "valid",
        }
    }
}

/// Point-in-time analytics snapshot for a symbol or pair. Mirrors
/// `AnalyticsSnapshot` in the original `shared/models.py`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsSnapshot {
    pub symbol: String,
    pub pair_symbol: Option<String>,
    pub timestamp_ms: i64,

    pub last_price: f64,
    pub price_change_pct: Option<f64>,
    pub vwap: Option<f64>,

    pub spread: Option<f64>,
    pub hedge_ratio: Option<f64>,
    pub z_score: Option<f64>,
    pub correlation: Option<f64>,

    pub adf_statistic: Option<f64>,
    pub adf_pvalue: Option<f64>,
    pub is_stationary: Option<bool>,

    pub data_freshness_ms: i64,
    pub validity_status: DataValidityStatus,
    pub tick_count: usize,
}

impl AnalyticsSnapshot {
    /// Encodes to the broker's hash representation. Omitted fields are
    /// simply not present, per §4.D's publication rule.
    pub fn to_broker_fields(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("timestamp".to_string(), self.timestamp_ms.to_string()),
            ("last_price".to_string(), self.last_price.to_string()),
            (
                "data_freshness_ms".to_string(),
                self.data_freshness_ms.to_string(),
            ),
            (
                "validity_status".to_string(),
                self.validity_status.as_str().to_string(),
            ),
            ("tick_count".to_string(), self.tick_count.to_string()),
        ];

        if let Some(ref pair) = self.pair_symbol {
            out.push(("pair_symbol".to_string(), pair.clone()));
        }
        macro_rules! push_opt {
            ($field:ident, $name:literal) => {
                if let Some(v) = self.$field {
                    out.push(($name.to_string(), v.to_string()));
                }
            };
        }
        push_opt!(price_change_pct, "price_change_pct");
        push_opt!(vwap, "vwap");
        push_opt!(spread, "spread");
        push_opt!(hedge_ratio, "hedge_ratio");
        push_opt!(z_score, "z_score");
        push_opt!(correlation, "correlation");
        push_opt!(adf_statistic, "adf_statistic");
        push_opt!(adf_pvalue, "adf_pvalue");
        if let Some(stationary) = self.is_stationary {
            out.push((
                "is_stationary".to_string(),
                if stationary { "1" } else { "0" }.to_string(),
            ));
        }

        out
    }

    pub fn from_broker_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let symbol = fields.get("symbol")?.clone();
        let timestamp_ms = fields.get("timestamp")?.parse().ok()?;
        let last_price = fields.get("last_price")?.parse().ok()?;
        let data_freshness_ms = fields.get("data_freshness_ms")?.parse().ok()?;
        let tick_count = fields.get("tick_count")?.parse().ok()?;
        let validity_status = match fields.get("validity_status").map(String::as_str) {
            Some("insufficient") => DataValidityStatus::Insufficient,
            Some("warming_up") => DataValidityStatus::WarmingUp,
            Some("valid") => DataValidityStatus::Valid,
            _ => return None,
        };

        Some(AnalyticsSnapshot {
            symbol,
            pair_symbol: fields.get("pair_symbol").cloned(),
            timestamp_ms,
            last_price,
            price_change_pct: fields.get("price_change_pct").and_then(|v| v.parse().ok()),
            vwap: fields.get("vwap").and_then(|v| v.parse().ok()),
            spread: fields.get("spread").and_then(|v| v.parse().ok()),
            hedge_ratio: fields.get("hedge_ratio").and_then(|v| v.parse().ok()),
            z_score: fields.get("z_score").and_then(|v| v.parse().ok()),
            correlation: fields.get("correlation").and_then(|v| v.parse().ok()),
            adf_statistic: fields.get("adf_statistic").and_then(|v| v.parse().ok()),
            adf_pvalue: fields.get("adf_pvalue").and_then(|v| v.parse().ok()),
            is_stationary: fields.get("is_stationary").map(|v| v == "1"),
            data_freshness_ms,
            validity_status,
            tick_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_boundaries() {
        assert_eq!(
            DataValidityStatus::classify(19, 100),
            DataValidityStatus::Insufficient
        );
        assert_eq!(
            DataValidityStatus::classify(20, 100),
            DataValidityStatus::WarmingUp
        );
        assert_eq!(
            DataValidityStatus::classify(99, 100),
            DataValidityStatus::WarmingUp
        );
        assert_eq!(
            DataValidityStatus::classify(100, 100),
            DataValidityStatus::Valid
        );
    }

    #[test]
    fn round_trips_omitting_absent_fields() {
        let snap = AnalyticsSnapshot {
            symbol: "BTCUSDT".into(),
            pair_symbol: None,
            timestamp_ms: 1700,
            last_price: 50000.0,
            price_change_pct: Some(1.5),
            vwap: None,
            spread: None,
            hedge_ratio: None,
            z_score: None,
            correlation: None,
            adf_statistic: None,
            adf_pvalue: None,
            is_stationary: None,
            data_freshness_ms: 10,
            validity_status: DataValidityStatus::Valid,
            tick_count: 100,
        };
        let fields: HashMap<String, String> = snap.to_broker_fields().into_iter().collect();
        assert!(!fields.contains_key("vwap"));
        let decoded = AnalyticsSnapshot::from_broker_fields(&fields).unwrap();
        assert_eq!(decoded.vwap, None);
        assert_eq!(decoded.price_change_pct, Some(1.5));
    }
}
