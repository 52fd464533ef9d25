mod client;
mod queries;
mod schema;

pub use client::{ColdStore, ColdStoreStats};
