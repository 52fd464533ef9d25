mod adf;
mod alerts;
mod stats;
mod window;

pub use window::SymbolWindow;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::{now_ms, BrokerAdapter};
use crate::config::{BrokerKeys, Settings};
use crate::model::{AnalyticsSnapshot, DataValidityStatus, Tick};

const MIN_POINTS_FOR_ANALYTICS: usize = 20;
const MIN_POINTS_FOR_ADF: usize = 50;
const SINGLE_COMPUTE_THROTTLE: Duration = Duration::from_millis(500);
const PAIR_COMPUTE_THROTTLE: Duration = Duration::from_millis(1000);
const READ_BLOCK_MS: usize = 500;
const READ_COUNT: usize = 100;
const TS_RETENTION_MS: i64 = 86_400_000;

/// Consumes tick streams, maintains per-symbol rolling windows, and
/// computes single-symbol and pairwise analytics. The main loop owns all
/// window state exclusively — single-writer single-reader on one task, so
/// no internal locking is needed (see the concurrency model).
pub struct QuantEngine {
    settings: Settings,
    broker: BrokerAdapter,
    windows: HashMap<String, SymbolWindow>,
    cursors: HashMap<String, String>,
    last_single_compute: HashMap<String, Instant>,
    last_pair_compute: HashMap<(String, String), Instant>,
    shutdown: Arc<AtomicBool>,
}

impl QuantEngine {
    pub fn new(settings: Settings, broker: BrokerAdapter) -> Self {
        let mut windows = HashMap::new();
        let mut cursors = HashMap::new();
        for symbol in &settings.symbols {
            let symbol = symbol.to_uppercase();
            windows.insert(symbol.clone(), SymbolWindow::new(settings.rolling_window_ticks));
            cursors.insert(BrokerKeys::tick_stream(&symbol), "$".to_string());
        }
        Self {
            settings,
            broker,
            windows,
            cursors,
            last_single_compute: HashMap::new(),
            last_pair_compute: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Spawns the main loop as a single task (the engine's window state is
    /// not `Send`-shared, so the engine itself must be moved into the task).
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

            let cursor_list: Vec<(String, String)> = self
                .cursors
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            match self.broker.stream_read(&cursor_list, READ_COUNT, READ_BLOCK_MS).await {
                Ok(streams) => {
                    for (key, entries) in streams {
                        for (id, fields) in entries {
                            self.cursors.insert(key.clone(), id);
                            match Tick::from_broker_fields(&fields) {
                                Ok((symbol, tick)) => self.process_tick(&symbol, tick),
                                Err(e) => {
                                    tracing::warn!(error = %e, "skipping malformed tick from stream");
                                }
                            }
                        }
                    }
                    self.compute_round().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "engine read cycle failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn process_tick(&mut self, symbol: &str, tick: Tick) {
        if let Some(window) = self.windows.get_mut(symbol) {
            window.push(tick.price, tick.qty, tick.timestamp_ms);
        }
    }

    async fn compute_round(&mut self) {
        let symbols: Vec<String> = self.windows.keys().cloned().collect();

        for symbol in &symbols {
            let due = self
                .last_single_compute
                .get(symbol)
                .map_or(true, |t| t.elapsed() >= SINGLE_COMPUTE_THROTTLE);
            if !due {
                continue;
            }
            if let Some(snapshot) = self.compute_single_symbol(symbol) {
                self.publish_snapshot(&BrokerKeys::analytics_state(symbol), &snapshot).await;
            }
            self.last_single_compute.insert(symbol.clone(), Instant::now());
        }

        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                let (a, b) = (symbols[i].clone(), symbols[j].clone());
                let pair_key = (a.clone(), b.clone());
                let due = self
                    .last_pair_compute
                    .get(&pair_key)
                    .map_or(true, |t| t.elapsed() >= PAIR_COMPUTE_THROTTLE);
                if !due {
                    continue;
                }
                if let Some(snapshot) = self.compute_pair(&a, &b) {
                    self.publish_snapshot(&BrokerKeys::pair_analytics_state(&a, &b), &snapshot)
                        .await;
                    self.evaluate_pair_alerts(&a, &b, &snapshot).await;
                }
                self.last_pair_compute.insert(pair_key, Instant::now());
            }
        }
    }

    fn compute_single_symbol(&self, symbol: &str) -> Option<AnalyticsSnapshot> {
        single_symbol_snapshot(self.windows.get(symbol)?, symbol)
    }

    /// Pair snapshot over `L = min(|A|, |B|)` points, aligned tail-to-tail.
    fn compute_pair(&self, symbol_a: &str, symbol_b: &str) -> Option<AnalyticsSnapshot> {
        pair_snapshot(
            self.windows.get(symbol_a)?,
            self.windows.get(symbol_b)?,
            symbol_a,
            symbol_b,
            self.settings.rolling_window_ticks,
        )
    }

    async fn publish_snapshot(&self, key: &str, snapshot: &AnalyticsSnapshot) {
        if let Err(e) = self.broker.hash_put(key, snapshot.to_broker_fields()).await {
            tracing::error!(key, error = %e, "failed to publish analytics snapshot");
        }
    }

    async fn evaluate_pair_alerts(&self, symbol_a: &str, symbol_b: &str, snapshot: &AnalyticsSnapshot) {
        let Some(z_score) = snapshot.z_score else {
            return;
        };
        let generated = alerts::check_zscore_alerts(symbol_a, symbol_b, z_score, self.settings.z_score_alert_threshold);
        for alert in generated {
            if let Err(e) = self.broker.add_alert(&alert, 24).await {
                tracing::error!(alert_id = %alert.id, error = %e, "failed to store alert");
                continue;
            }
            if let Ok(payload) = serde_json::to_string(&alert_payload(&alert)) {
                let _ = self.broker.publish(BrokerKeys::CHANNEL_ALERTS, &payload).await;
            }
        }
    }
}

fn single_symbol_snapshot(window: &SymbolWindow, symbol: &str) -> Option<AnalyticsSnapshot> {
    if window.is_empty() {
        return None;
    }

    Some(AnalyticsSnapshot {
        symbol: symbol.to_string(),
        pair_symbol: None,
        timestamp_ms: now_ms(),
        last_price: window.last_price().unwrap_or(0.0),
        price_change_pct: Some(window.price_change_pct()),
        vwap: window.vwap(),
        spread: None,
        hedge_ratio: None,
        z_score: None,
        correlation: None,
        adf_statistic: None,
        adf_pvalue: None,
        is_stationary: None,
        data_freshness_ms: now_ms() - window.last_tick_time_ms(),
        validity_status: window.validity_status(),
        tick_count: window.len(),
    })
}

fn pair_snapshot(
    window_a: &SymbolWindow,
    window_b: &SymbolWindow,
    symbol_a: &str,
    symbol_b: &str,
    rolling_window_ticks: usize,
) -> Option<AnalyticsSnapshot> {
    let prices_a_full = window_a.prices_slice();
    let prices_b_full = window_b.prices_slice();
    let l = prices_a_full.len().min(prices_b_full.len());
    if l < MIN_POINTS_FOR_ANALYTICS {
        return None;
    }

    let y = &prices_a_full[prices_a_full.len() - l..];
    let x = &prices_b_full[prices_b_full.len() - l..];

    let hedge_ratio = stats::ols_hedge_ratio(x, y);
    let spread_series = stats::spread_series(x, y, hedge_ratio);
    let spread = *spread_series.last().unwrap();
    let z_score = stats::rolling_zscore(&spread_series);
    let correlation = stats::pearson_correlation(x, y);

    let (adf_statistic, adf_pvalue, is_stationary) = if l >= MIN_POINTS_FOR_ADF {
        match adf::adf_test(&spread_series) {
            Some(result) => (
                Some(result.statistic),
                Some(result.pvalue),
                Some(result.pvalue < 0.05),
            ),
            None => (None, None, None),
        }
    } else {
        (None, None, None)
    };

    let last_time = window_a.last_tick_time_ms().min(window_b.last_tick_time_ms());

    Some(AnalyticsSnapshot {
        symbol: symbol_a.to_string(),
        pair_symbol: Some(symbol_b.to_string()),
        timestamp_ms: now_ms(),
        last_price: window_a.last_price().unwrap_or(0.0),
        price_change_pct: None,
        vwap: None,
        spread: Some(spread),
        hedge_ratio: Some(hedge_ratio),
        z_score: Some(z_score),
        correlation: Some(correlation),
        adf_statistic,
        adf_pvalue,
        is_stationary,
        data_freshness_ms: now_ms() - last_time,
        validity_status: DataValidityStatus::classify(l, rolling_window_ticks),
        tick_count: l,
    })
}

fn alert_payload(alert: &crate::model::Alert) -> serde_json::Value {
    serde_json::json!({
        "id": alert.id,
        "alert_type": alert.alert_type.as_str(),
        "symbol": alert.symbol,
        "message": alert.message,
        "timestamp_ms": alert.timestamp_ms,
        "severity": alert.severity.as_str(),
        "value": alert.value,
        "threshold": alert.threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_analytics_skipped_below_minimum_points() {
        let mut window_a = SymbolWindow::new(100);
        let mut window_b = SymbolWindow::new(100);
        for i in 0..10 {
            window_a.push(100.0 + i as f64, 1.0, i as i64);
            window_b.push(50.0 + i as f64, 1.0, i as i64);
        }
        assert!(pair_snapshot(&window_a, &window_b, "BTCUSDT", "ETHUSDT", 100).is_none());
    }

    #[test]
    fn pair_analytics_present_once_minimum_reached() {
        let mut window_a = SymbolWindow::new(100);
        let mut window_b = SymbolWindow::new(100);
        for i in 0..25 {
            window_a.push(100.0 + i as f64, 1.0, i as i64);
            window_b.push(50.0 + 0.5 * i as f64, 1.0, i as i64);
        }
        let snapshot = pair_snapshot(&window_a, &window_b, "BTCUSDT", "ETHUSDT", 100).unwrap();
        assert_eq!(snapshot.tick_count, 25);
        assert!(snapshot.hedge_ratio.is_some());
        assert!(snapshot.adf_statistic.is_none()); // L < 50
    }

    #[test]
    fn single_symbol_snapshot_is_none_for_empty_window() {
        let window = SymbolWindow::new(100);
        assert!(single_symbol_snapshot(&window, "BTCUSDT").is_none());
    }
}
