//! Structured logging setup: `tracing` + `tracing-subscriber`, env-filter driven.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber. Call once at process start,
/// before spawning any pipeline.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
