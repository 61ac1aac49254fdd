//! Tracing subscriber setup for hosts embedding the engine.
//!
//! Filter priority: `RAGDB_LOG`, then `RUST_LOG`, then the caller's default
//! directive. Output goes to stderr.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "RAGDB_LOG";

/// Install a global subscriber. Returns `false` when one was already set,
/// so tests and hosts may call this more than once.
pub fn init_tracing(default_directive: &str) -> bool {
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true).compact();
    tracing_subscriber::registry().with(build_env_filter(default_directive)).with(fmt_layer).try_init().is_ok()
}

pub fn build_env_filter(default_directive: &str) -> EnvFilter {
    if let Some(filter) = std::env::var(LOG_ENV).ok().and_then(|d| EnvFilter::try_new(d).ok()) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(default_directive).unwrap_or_else(|_| EnvFilter::new("warn"))
}
