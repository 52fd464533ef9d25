mod alert;
mod analytics;
mod tick;

pub use alert::{Alert, AlertOperator, AlertRule, AlertSeverity, AlertType};
pub use analytics::{AnalyticsSnapshot, DataValidityStatus};
pub use tick::{OhlcBar, Tick};

/// Structured log entry published on the broker's log channel by every
/// state-mutating operation, consumed by the Alert/Log Sink.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp_ms: i64,
    pub service: String,
    pub level: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_count: Option<u64>,
}
