mod rotate;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;

use crate::broker::BrokerAdapter;
use crate::config::{BrokerKeys, Settings};
use crate::model::LogEntry;
use rotate::RotatingWriter;

const RATE_LIMITED_OPERATIONS: [&str; 2] = ["stream_write", "ts_write"];
const ALWAYS_LOGGED_OPERATIONS: [&str; 4] = ["connect", "disconnect", "error", "heartbeat"];
const ACCESS_OPERATIONS: [&str; 7] = [
    "stream_write",
    "stream_read",
    "hash_write",
    "hash_read",
    "ts_write",
    "ts_read",
    "alert_write",
];
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Subscribes to the broker's log channel, rate-limits high-frequency
/// write operations, and fans entries out to three rotating files.
pub struct AlertLogSink {
    broker: BrokerAdapter,
    log_dir: PathBuf,
    max_size_mb: u64,
    backup_count: usize,
    shutdown: Arc<AtomicBool>,
}

impl AlertLogSink {
    pub fn new(settings: &Settings, broker: BrokerAdapter) -> Self {
        Self {
            broker,
            log_dir: PathBuf::from(&settings.log_dir),
            max_size_mb: settings.log_max_size_mb,
            backup_count: settings.log_backup_count,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut all_writer = match RotatingWriter::open(&self.log_dir, "all", self.max_size_mb, self.backup_count) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "failed to open all.log, log sink exiting");
                return;
            }
        };
        let mut error_writer = RotatingWriter::open(&self.log_dir, "errors", self.max_size_mb, self.backup_count)
            .expect("errors.log should open alongside all.log");
        let mut access_writer = RotatingWriter::open(&self.log_dir, "access", self.max_size_mb, self.backup_count)
            .expect("access.log should open alongside all.log");

        let mut pubsub = match self.broker.subscribe_connection().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to log channel, log sink exiting");
                return;
            }
        };
        if let Err(e) = pubsub.subscribe(BrokerKeys::CHANNEL_LOGS).await {
            tracing::error!(error = %e, "failed to subscribe to log channel");
            return;
        }
        let mut stream = pubsub.on_message();

        let mut aggregator = RateLimitAggregator::default();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let next = tokio::time::timeout(RECEIVE_TIMEOUT, stream.next()).await;
            let Ok(Some(msg)) = next else {
                continue;
            };
            let Ok(payload) = msg.get_payload::<String>() else {
                continue;
            };
            let Ok(entry) = serde_json::from_str::<LogEntry>(&payload) else {
                continue;
            };

            if let Some(to_emit) = aggregator.admit(entry) {
                self.emit(&mut all_writer, &mut error_writer, &mut access_writer, &to_emit);
            }
        }
    }

    fn emit(
        &self,
        all: &mut RotatingWriter,
        errors: &mut RotatingWriter,
        access: &mut RotatingWriter,
        entry: &LogEntry,
    ) {
        let line = format_entry(entry);
        let _ = all.write_line(&line);

        let level = entry.level.to_uppercase();
        if level == "ERROR" || level == "WARN" || level == "WARNING" {
            let _ = errors.write_line(&line);
        }
        if ACCESS_OPERATIONS.contains(&entry.operation.as_str()) {
            let _ = access.write_line(&line);
        }
    }
}

fn format_entry(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {} {} {} {}",
        entry.timestamp_ms, entry.level, entry.service, entry.operation, entry.message
    );
    if let Some(count) = entry.aggregated_count {
        line.push_str(&format!(" aggregated_count={count}"));
    }
    line
}

/// Aggregates `stream_write`/`ts_write` entries per `(service, operation)`
/// into a single line per window; everything else passes through
/// immediately. Connect/disconnect/error/heartbeat are never rate-limited.
#[derive(Default)]
struct RateLimitAggregator {
    windows: HashMap<(String, String), WindowState>,
}

struct WindowState {
    started_at: Instant,
    count: u64,
    last_entry: LogEntry,
}

impl RateLimitAggregator {
    /// Returns `Some(entry)` when a line should be emitted now: either the
    /// entry bypasses rate limiting, or the 1-second aggregation window for
    /// its `(service, operation)` key has just closed.
    fn admit(&mut self, entry: LogEntry) -> Option<LogEntry> {
        if ALWAYS_LOGGED_OPERATIONS.contains(&entry.operation.as_str())
            || !RATE_LIMITED_OPERATIONS.contains(&entry.operation.as_str())
        {
            return Some(entry);
        }

        let key = (entry.service.clone(), entry.operation.clone());
        let now = Instant::now();
        let window = self.windows.entry(key.clone()).or_insert_with(|| WindowState {
            started_at: now,
            count: 0,
            last_entry: entry.clone(),
        });

        window.count += 1;
        window.last_entry = entry;

        if now.duration_since(window.started_at) >= RATE_LIMIT_WINDOW {
            let mut emitted = window.last_entry.clone();
            emitted.aggregated_count = Some(window.count);
            self.windows.remove(&key);
            Some(emitted)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(service: &str, operation: &str) -> LogEntry {
        LogEntry {
            timestamp_ms: 0,
            service: service.to_string(),
            level: "INFO".to_string(),
            operation: operation.to_string(),
            key: None,
            message: "test".to_string(),
            duration_ms: None,
            aggregated_count: None,
        }
    }

    #[test]
    fn always_logged_operations_pass_through_immediately() {
        let mut agg = RateLimitAggregator::default();
        assert!(agg.admit(entry("gateway", "connect")).is_some());
        assert!(agg.admit(entry("gateway", "heartbeat")).is_some());
    }

    #[test]
    fn rate_limited_operations_suppressed_within_window() {
        let mut agg = RateLimitAggregator::default();
        assert!(agg.admit(entry("broker", "stream_write")).is_none());
        assert!(agg.admit(entry("broker", "stream_write")).is_none());
    }

    #[test]
    fn non_rate_limited_operation_passes_through() {
        let mut agg = RateLimitAggregator::default();
        assert!(agg.admit(entry("broker", "hash_read")).is_some());
    }
}
