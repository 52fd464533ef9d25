mod client;

pub use client::{now_ms, BrokerAdapter, BrokerPipeline, BrokerStats};
