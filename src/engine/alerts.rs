use crate::broker::now_ms;
use crate::model::{Alert, AlertSeverity, AlertType};

/// Evaluates the z-score alert rules against a freshly computed pair
/// snapshot. Threshold crossing in either direction produces exactly one
/// alert; duplicate suppression is left to downstream consumers (they
/// dedupe by `id`).
pub fn check_zscore_alerts(symbol_a: &str, symbol_b: &str, z_score: f64, threshold: f64) -> Vec<Alert> {
    let pair_symbol = format!("{symbol_a}:{symbol_b}");
    let mut alerts = Vec::new();

    if z_score > threshold {
        alerts.push(Alert {
            id: uuid_like(&pair_symbol, "high"),
            alert_type: AlertType::ZScoreHigh,
            symbol: pair_symbol.clone(),
            message: format!("z-score {z_score:.4} exceeds threshold {threshold:.4}"),
            timestamp_ms: now_ms(),
            severity: AlertSeverity::Warning,
            value: Some(z_score),
            threshold: Some(threshold),
            acknowledged: false,
        });
    } else if z_score < -threshold {
        alerts.push(Alert {
            id: uuid_like(&pair_symbol, "low"),
            alert_type: AlertType::ZScoreLow,
            symbol: pair_symbol,
            message: format!("z-score {z_score:.4} below threshold {:.4}", -threshold),
            timestamp_ms: now_ms(),
            severity: AlertSeverity::Warning,
            value: Some(z_score),
            threshold: Some(-threshold),
            acknowledged: false,
        });
    }

    alerts
}

/// Deterministic, collision-resistant-enough id for a given pair/kind/tick,
/// avoiding a dependency on a UUID crate the pack doesn't otherwise pull in.
fn uuid_like(pair_symbol: &str, kind: &str) -> String {
    format!("{}-{}-{}", pair_symbol.to_lowercase(), kind, now_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_high_alert_above_threshold() {
        let alerts = check_zscore_alerts("BTCUSDT", "ETHUSDT", 3.0, 2.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::ZScoreHigh);
    }

    #[test]
    fn fires_low_alert_below_negative_threshold() {
        let alerts = check_zscore_alerts("BTCUSDT", "ETHUSDT", -3.0, 2.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::ZScoreLow);
    }

    #[test]
    fn no_alert_within_threshold() {
        let alerts = check_zscore_alerts("BTCUSDT", "ETHUSDT", 1.0, 2.0);
        assert!(alerts.is_empty());
    }
}
