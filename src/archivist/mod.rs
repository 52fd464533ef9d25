mod export;

pub use export::{ticks_to_csv, ticks_to_json};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::BrokerAdapter;
use crate::coldstore::ColdStore;
use crate::config::{BrokerKeys, Settings};
use crate::model::{Alert, AnalyticsSnapshot, Tick};

const RETRY_SLEEP: Duration = Duration::from_secs(10);
const RANGE_MAX: usize = 10_000;
const ALERT_SCAN_LIMIT: usize = 1000;
/// Matches the engine's `add_alert` hot-storage TTL (§4.D); an alert
/// reaching this age is retired into history before its hash expires.
const ALERT_RETIRE_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Periodically drains new tick-stream entries and the latest analytics
/// hash into the cold store, tracking a per-symbol cursor so restarts
/// don't re-archive already-committed ticks.
pub struct Archivist {
    settings: Settings,
    broker: BrokerAdapter,
    coldstore: ColdStore,
    cursors: HashMap<String, String>,
    shutdown: Arc<AtomicBool>,
}

impl Archivist {
    pub fn new(settings: Settings, broker: BrokerAdapter, coldstore: ColdStore) -> Self {
        let mut cursors = HashMap::new();
        for symbol in &settings.symbols {
            cursors.insert(symbol.to_uppercase(), "$".to_string());
        }
        Self {
            settings,
            broker,
            coldstore,
            cursors,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(self.settings.archive_interval()).await;
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = self.archive_all_symbols().await {
                tracing::error!(error = %e, "archive cycle failed, retrying after backoff");
                tokio::time::sleep(RETRY_SLEEP).await;
            }
        }
    }

    async fn archive_all_symbols(&mut self) -> crate::error::Result<()> {
        let symbols: Vec<String> = self.settings.symbols.iter().map(|s| s.to_uppercase()).collect();
        for symbol in &symbols {
            self.archive_ticks(symbol).await?;
            self.archive_analytics(symbol).await?;
        }
        self.archive_alerts().await?;
        Ok(())
    }

    /// Reads new stream entries since the per-symbol cursor, bulk-inserts
    /// them, and advances the cursor only on success — guaranteeing
    /// at-least-once delivery across restarts.
    async fn archive_ticks(&mut self, symbol: &str) -> crate::error::Result<()> {
        let stream_key = BrokerKeys::tick_stream(symbol);
        let cursor = self.cursors.get(symbol).cloned().unwrap_or_else(|| "$".to_string());

        // "$" means "new entries only", matching the engine's own `$`
        // bootstrap — resolve it to the stream's current last id so a
        // restart never re-archives pre-existing entries (§4.E/§9).
        let (from, cursor) = if cursor == "$" {
            match self.broker.stream_last_id(&stream_key).await? {
                Some(last_id) => (format!("({last_id}"), last_id),
                None => return Ok(()), // stream doesn't exist yet; stay on "$"
            }
        } else {
            (format!("({cursor}"), cursor)
        };
        // Persist the resolved cursor immediately so a bootstrap never
        // re-resolves "$" to a later id on a subsequent empty cycle.
        self.cursors.insert(symbol.to_string(), cursor.clone());

        let entries = self
            .broker
            .stream_range(&stream_key, &from, "+", Some(self.settings.archive_batch_size.min(RANGE_MAX)))
            .await?;

        if entries.is_empty() {
            return Ok(());
        }

        let mut ticks = Vec::with_capacity(entries.len());
        let mut last_id = cursor;
        for (id, fields) in &entries {
            match Tick::from_broker_fields(fields) {
                Ok((_, tick)) => ticks.push(tick),
                Err(e) => tracing::warn!(error = %e, "skipping malformed archived tick"),
            }
            last_id = id.clone();
        }

        self.coldstore.insert_ticks_batch(symbol, &ticks).await?;
        self.cursors.insert(symbol.to_string(), last_id);
        Ok(())
    }

    async fn archive_analytics(&self, symbol: &str) -> crate::error::Result<()> {
        let key = BrokerKeys::analytics_state(symbol);
        let fields = self.broker.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(());
        }
        if let Some(snapshot) = AnalyticsSnapshot::from_broker_fields(&fields) {
            self.coldstore.insert_analytics_snapshot(&snapshot).await?;
        }
        Ok(())
    }

    /// Drains alerts that have been acknowledged, or that are old enough
    /// to be retired before their hot-storage TTL expires, into permanent
    /// history, then removes them from `alerts:active` so they aren't
    /// archived twice. Unlike ticks, alerts are idempotently upserted by
    /// id, so no separate cursor is required.
    async fn archive_alerts(&self) -> crate::error::Result<()> {
        let active = self.broker.list_active_alerts(ALERT_SCAN_LIMIT, None).await?;
        let now = crate::broker::now_ms();
        let retiring: Vec<Alert> = active
            .into_iter()
            .filter(|a| a.acknowledged || now - a.timestamp_ms >= ALERT_RETIRE_AGE_MS)
            .collect();
        if retiring.is_empty() {
            return Ok(());
        }

        for alert in &retiring {
            self.coldstore.archive_alert(alert).await?;
        }
        for alert in &retiring {
            if let Err(e) = self.broker.remove_alert(&alert.id).await {
                tracing::warn!(error = %e, alert_id = %alert.id, "failed to retire archived alert from hot storage");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_range_cursor_excludes_previously_seen_entry() {
        let cursor = "1700000000000-0".to_string();
        let from = format!("({cursor}");
        assert_eq!(from, "(1700000000000-0");
    }
}
