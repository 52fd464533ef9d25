use quant_stream_pipeline::config::Settings;
use quant_stream_pipeline::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(error = %e, "prometheus exporter not installed, metrics will be recorded but not exposed");
    }

    let settings = Settings::from_env();
    tracing::info!(symbols = ?settings.symbols, "starting pipeline");

    match Orchestrator::start(settings).await {
        Ok(orchestrator) => orchestrator.run_until_signal().await,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}
