//! `tracing-subscriber` setup: an `RUST_LOG`-driven env filter over a
//! compact fmt layer, matching the ambient logging stack used across the
//! rest of the corpus rather than hand-rolling anything.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
