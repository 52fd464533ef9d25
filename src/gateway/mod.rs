mod parser;
mod state;

pub use parser::{BinanceTradeParser, TradeEventParser};
pub use state::{Backoff, ConnectionState, SymbolGatewayStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::broker::BrokerAdapter;
use crate::config::{BrokerKeys, Settings};
use crate::model::{LogEntry, Tick};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const PING_INTERVAL: Duration = Duration::from_secs(20);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const TS_RETENTION_MS: i64 = 86_400_000;

/// Maintains one streaming connection per symbol to the exchange, buffers
/// normalized trade ticks, and flushes them to the broker in batches.
pub struct MarketGateway {
    settings: Settings,
    broker: BrokerAdapter,
    parser: Arc<dyn TradeEventParser>,
    buffers: Arc<DashMap<String, Mutex<Vec<Tick>>>>,
    stats: Arc<DashMap<String, Arc<SymbolGatewayStats>>>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl MarketGateway {
    pub fn new(settings: Settings, broker: BrokerAdapter) -> Self {
        let buffers = Arc::new(DashMap::new());
        let stats = Arc::new(DashMap::new());
        for symbol in &settings.symbols {
            buffers.insert(symbol.to_uppercase(), Mutex::new(Vec::new()));
            stats.insert(symbol.to_uppercase(), Arc::new(SymbolGatewayStats::default()));
        }
        Self {
            settings,
            broker,
            parser: Arc::new(BinanceTradeParser),
            buffers,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Swaps in a custom parser, e.g. for a different exchange wire format.
    pub fn with_parser(mut self, parser: Arc<dyn TradeEventParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn stats(&self, symbol: &str) -> Option<Arc<SymbolGatewayStats>> {
        self.stats.get(&symbol.to_uppercase()).map(|s| s.clone())
    }

    /// Spawns one listener task per symbol plus the flush and heartbeat
    /// workers, returning their join handles for the orchestrator.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        for symbol in self.settings.symbols.clone() {
            let symbol = symbol.to_uppercase();
            let ws_base = self.settings.exchange_ws_base.clone();
            let parser = self.parser.clone();
            let buffers = self.buffers.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            let notify = self.notify.clone();
            handles.push(tokio::spawn(async move {
                listener_loop(symbol, ws_base, parser, buffers, stats, shutdown, notify).await;
            }));
        }

        {
            let buffers = self.buffers.clone();
            let broker = self.broker.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                flush_loop(buffers, broker, shutdown).await;
            }));
        }

        {
            let stats = self.stats.clone();
            let broker = self.broker.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                heartbeat_loop(stats, broker, shutdown).await;
            }));
        }

        handles
    }

    /// Sets the shutdown flag and wakes every suspended worker.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

async fn listener_loop(
    symbol: String,
    ws_base: String,
    parser: Arc<dyn TradeEventParser>,
    buffers: Arc<DashMap<String, Mutex<Vec<Tick>>>>,
    stats: Arc<DashMap<String, Arc<SymbolGatewayStats>>>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    let url = format!("{}/{}@trade", ws_base, symbol.to_lowercase());
    let mut backoff = Backoff::new();

    while !shutdown.load(Ordering::SeqCst) {
        if let Some(s) = stats.get(&symbol) {
            s.set_state(ConnectionState::Connecting);
        }
        let connect_result = tokio_tungstenite::connect_async(&url).await;
        let mut ws = match connect_result {
            Ok((ws, _)) => ws,
            Err(e) => {
                if let Some(s) = stats.get(&symbol) {
                    s.set_state(ConnectionState::Disconnected);
                }
                tracing::warn!(symbol = %symbol, error = %e, "exchange connection failed");
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = notify.notified() => {}
                }
                continue;
            }
        };
        backoff.reset();
        if let Some(s) = stats.get(&symbol) {
            s.set_state(ConnectionState::Connected);
        }
        tracing::info!(symbol = %symbol, "exchange connected");

        let mut last_ping = Instant::now();
        let mut last_pong = Instant::now();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                if let Some(s) = stats.get(&symbol) {
                    s.set_state(ConnectionState::Stopped);
                }
                let _ = ws.close(None).await;
                return;
            }

            match timeout(RECV_TIMEOUT, ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => match parser.parse(&text) {
                    Ok(Some(tick)) => {
                        if let Some(buf) = buffers.get(&symbol) {
                            buf.lock().push(tick);
                        }
                        if let Some(s) = stats.get(&symbol) {
                            s.record_tick(tick.timestamp_ms);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(symbol = %symbol, error = %e, "discarding malformed trade event");
                    }
                },
                Ok(Some(Ok(Message::Ping(data)))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Ok(Some(Ok(Message::Pong(_)))) => {
                    last_pong = Instant::now();
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    if let Some(s) = stats.get(&symbol) {
                        s.set_state(ConnectionState::Disconnected);
                    }
                    tracing::warn!(symbol = %symbol, error = %e, "exchange stream error, reconnecting");
                    break;
                }
                Ok(None) => {
                    if let Some(s) = stats.get(&symbol) {
                        s.set_state(ConnectionState::Disconnected);
                    }
                    tracing::warn!(symbol = %symbol, "exchange closed connection, reconnecting");
                    break;
                }
                Err(_) => {
                    // recv timeout; fall through to ping/shutdown checks below
                }
            }

            if last_ping.elapsed() >= PING_INTERVAL {
                let _ = ws.send(Message::Ping(Vec::new())).await;
                last_ping = Instant::now();
            }
            if last_pong.elapsed() > PING_INTERVAL + PONG_TIMEOUT {
                if let Some(s) = stats.get(&symbol) {
                    s.set_state(ConnectionState::Disconnected);
                }
                tracing::warn!(symbol = %symbol, "pong timeout, reconnecting");
                break;
            }
        }
    }
}

async fn flush_loop(
    buffers: Arc<DashMap<String, Mutex<Vec<Tick>>>>,
    broker: BrokerAdapter,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        tokio::time::sleep(FLUSH_INTERVAL).await;
        flush_all(&buffers, &broker).await;
        if shutdown.load(Ordering::SeqCst) {
            // Drain once more after shutdown is observed, per §4.C's state
            // machine ("closes the socket and then drains the buffer once").
            flush_all(&buffers, &broker).await;
            return;
        }
    }
}

async fn flush_all(buffers: &DashMap<String, Mutex<Vec<Tick>>>, broker: &BrokerAdapter) {
    for entry in buffers.iter() {
        let symbol = entry.key().clone();
        let batch = {
            let mut guard = entry.value().lock();
            std::mem::take(&mut *guard)
        };
        if batch.is_empty() {
            continue;
        }

        let stream_key = BrokerKeys::tick_stream(&symbol);
        let ts_key = BrokerKeys::price_timeseries(&symbol);
        let mut pipeline = broker.pipeline();
        for tick in &batch {
            pipeline.stream_append(&stream_key, &tick.to_broker_fields(&symbol), TS_RETENTION_MS);
            pipeline.ts_append(&ts_key, tick.timestamp_ms, tick.price, TS_RETENTION_MS);
        }
        if let Err(e) = pipeline.execute().await {
            tracing::error!(symbol = %symbol, error = %e, "failed to flush tick batch");
        }
    }
}

async fn heartbeat_loop(
    stats: Arc<DashMap<String, Arc<SymbolGatewayStats>>>,
    broker: BrokerAdapter,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        let now = crate::broker::now_ms();
        for entry in stats.iter() {
            let symbol = entry.key().clone();
            let tick_count = entry.value().tick_count();
            let freshness_ms = entry.value().freshness_ms(now);
            metrics::gauge!("gateway_tick_count", "symbol" => symbol.clone()).set(tick_count as f64);
            metrics::gauge!("gateway_freshness_ms", "symbol" => symbol.clone()).set(freshness_ms as f64);
            if freshness_ms > 5000 {
                tracing::warn!(symbol = %symbol, freshness_ms, "tick stream stale");
            }

            let message = format!("tick_count={tick_count} freshness_ms={freshness_ms}");
            let entry = LogEntry {
                timestamp_ms: now,
                service: "market_gateway".to_string(),
                level: "INFO".to_string(),
                operation: "heartbeat".to_string(),
                key: Some(symbol),
                message,
                duration_ms: None,
                aggregated_count: None,
            };
            if let Ok(payload) = serde_json::to_string(&entry) {
                let _ = broker.publish(BrokerKeys::CHANNEL_LOGS, &payload).await;
            }
        }
    }
}
