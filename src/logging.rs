//! Tracing initialization for the launcher binary.
//!
//! Grounded on `snakeway-core`'s `logging.rs`: an `EnvFilter` read from
//! `RUST_LOG`, falling back to `info`. The core library never calls this —
//! only `proxyd`'s `main` does, so an embedder driving [`crate::Server`]
//! from its own process keeps control of its own subscriber.

use tracing_subscriber::EnvFilter;

/// Installs a process-wide `tracing` subscriber. Call once, from `main`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
