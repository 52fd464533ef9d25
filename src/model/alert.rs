use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    ZScoreHigh,
    ZScoreLow,
    CorrelationBreak,
    DataStale,
    StationarityChange,
    Custom,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ZScoreHigh => "z_score_high",
            AlertType::ZScoreLow => "z_score_low",
            AlertType::CorrelationBreak => "correlation_break",
            AlertType::DataStale => "data_stale",
            AlertType::StationarityChange => "stationarity_change",
            AlertType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "z_score_high" => Some(AlertType::ZScoreHigh),
            "z_score_low" => Some(AlertType::ZScoreLow),
            "correlation_break" => Some(AlertType::CorrelationBreak),
            "data_stale" => Some(AlertType::DataStale),
            "stationarity_change" => Some(AlertType::StationarityChange),
            "custom" => Some(AlertType::Custom),
            _ => None,
        }
    }
}

/// Threshold-driven alert. Stored both as a hash keyed `alert:<id>` with a
/// TTL and in the `alerts:active` ordered index, and published on
/// `channel:alerts`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub symbol: String,
    pub message: String,
    pub timestamp_ms: i64,
    pub severity: AlertSeverity,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn to_broker_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.clone()),
            ("alert_type".to_string(), self.alert_type.as_str().to_string()),
            ("symbol".to_string(), self.symbol.clone()),
            ("message".to_string(), self.message.clone()),
            ("timestamp".to_string(), self.timestamp_ms.to_string()),
            ("severity".to_string(), self.severity.as_str().to_string()),
            (
                "value".to_string(),
                self.value.map(|v| v.to_string()).unwrap_or_default(),
            ),
            (
                "threshold".to_string(),
                self.threshold.map(|v| v.to_string()).unwrap_or_default(),
            ),
            (
                "acknowledged".to_string(),
                if self.acknowledged { "1" } else { "0" }.to_string(),
            ),
        ]
    }

    pub fn from_broker_fields(fields: &HashMap<String, String>) -> Option<Self> {
        Some(Alert {
            id: fields.get("id")?.clone(),
            alert_type: AlertType::parse(fields.get("alert_type")?)?,
            symbol: fields.get("symbol")?.clone(),
            message: fields.get("message").cloned().unwrap_or_default(),
            timestamp_ms: fields.get("timestamp")?.parse().ok()?,
            severity: AlertSeverity::parse(fields.get("severity")?)?,
            value: fields
                .get("value")
                .filter(|v| !v.is_empty())
                .and_then(|v| v.parse().ok()),
            threshold: fields
                .get("threshold")
                .filter(|v| !v.is_empty())
                .and_then(|v| v.parse().ok()),
            acknowledged: fields.get("acknowledged").map(|v| v == "1").unwrap_or(false),
        })
    }
}

/// User-defined alert rule. Supplements the CORE runtime `Alert` type with
/// a configuration record (see `SPEC_FULL.md` §3); not evaluated
/// automatically by the engine, which hardcodes z-score thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: String,
    pub symbol: String,
    pub metric: String,
    pub operator: AlertOperator,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOperator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
}

impl AlertOperator {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertOperator::Gt => value > threshold,
            AlertOperator::Lt => value < threshold,
            AlertOperator::Gte => value >= threshold,
            AlertOperator::Lte => value <= threshold,
            AlertOperator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_broker_fields() {
        let alert = Alert {
            id: "abc-123".into(),
            alert_type: AlertType::ZScoreHigh,
            symbol: "BTCUSDT:ETHUSDT".into(),
            message: "Z-score above threshold".into(),
            timestamp_ms: 1700,
            severity: AlertSeverity::Warning,
            value: Some(3.2),
            threshold: Some(2.0),
            acknowledged: false,
        };
        let fields: HashMap<String, String> = alert.to_broker_fields().into_iter().collect();
        let decoded = Alert::from_broker_fields(&fields).unwrap();
        assert_eq!(decoded, alert);
    }

    #[test]
    fn operator_evaluates_correctly() {
        assert!(AlertOperator::Gt.evaluate(3.0, 2.0));
        assert!(!AlertOperator::Gt.evaluate(2.0, 2.0));
        assert!(AlertOperator::Gte.evaluate(2.0, 2.0));
        assert!(AlertOperator::Lt.evaluate(-3.0, -2.0));
    }
}
