//! Starts and stops every worker with the staggered delays and shutdown
//! propagation described in the concurrency model: Market Gateway (t=0),
//! Quant Engine (t=2s), Archivist (t=5s), Log Sink (t=0); stop in reverse
//! order on SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::archivist::Archivist;
use crate::broker::BrokerAdapter;
use crate::coldstore::ColdStore;
use crate::config::Settings;
use crate::engine::QuantEngine;
use crate::error::Result;
use crate::gateway::MarketGateway;
use crate::logsink::AlertLogSink;

pub struct Orchestrator {
    settings: Settings,
    handles: Vec<JoinHandle<()>>,
    shutdown_flags: Vec<Arc<AtomicBool>>,
    gateway: Option<Arc<MarketGateway>>,
}

impl Orchestrator {
    /// Connects to the broker and cold store, then starts every worker.
    /// Connection failure here is Fatal per the error-handling design —
    /// the caller should abort the process with a non-zero exit.
    pub async fn start(settings: Settings) -> Result<Self> {
        let log_sink_broker = BrokerAdapter::connect("alert_log_sink", &settings.broker_url).await?;
        let gateway_broker = BrokerAdapter::connect("market_gateway", &settings.broker_url).await?;
        let engine_broker = BrokerAdapter::connect("quant_engine", &settings.broker_url).await?;
        let archivist_broker = BrokerAdapter::connect("archivist", &settings.broker_url).await?;
        let coldstore = ColdStore::connect(&settings.coldstore_url).await?;

        let mut handles = Vec::new();
        let mut shutdown_flags = Vec::new();

        let log_sink = AlertLogSink::new(&settings, log_sink_broker);
        shutdown_flags.push(log_sink.shutdown_handle());
        handles.push(log_sink.spawn());

        let gateway = Arc::new(MarketGateway::new(settings.clone(), gateway_broker));
        handles.extend(gateway.spawn());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let engine = QuantEngine::new(settings.clone(), engine_broker);
        shutdown_flags.push(engine.shutdown_handle());
        handles.push(engine.spawn());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let archivist = Archivist::new(settings.clone(), archivist_broker, coldstore);
        shutdown_flags.push(archivist.shutdown_handle());
        handles.push(archivist.spawn());

        Ok(Self {
            settings,
            handles,
            shutdown_flags,
            gateway: Some(gateway),
        })
    }

    /// Blocks until SIGINT/SIGTERM, then stops every worker in reverse
    /// start order and waits for their tasks to finish.
    pub async fn run_until_signal(mut self) {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping workers");
        self.stop().await;
    }

    async fn stop(&mut self) {
        if let Some(gateway) = self.gateway.take() {
            gateway.stop();
        }
        for flag in self.shutdown_flags.iter().rev() {
            flag.store(true, Ordering::SeqCst);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
