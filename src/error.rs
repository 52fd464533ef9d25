use thiserror::Error;

/// Errors surfaced by the pipeline's subsystems.
///
/// Hot-path call sites (tick parsing, per-entry archival) catch and log
/// these locally rather than propagating them; lifecycle call sites
/// (`connect`, schema bootstrap) propagate via `?` up to the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("broker unavailable: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("cold store error: {0}")]
    ColdStore(#[from] tokio_postgres::Error),

    #[error("cold store pool error: {0}")]
    ColdStorePool(#[from] deadpool_postgres::PoolError),

    #[error("exchange connection error: {0}")]
    Exchange(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed input: {0}")]
    Parse(String),

    #[error("shutdown requested")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
