//! Logging setup.
//!
//! Everything goes to **stderr**: stdout carries the handshake line the host
//! reads to find the gRPC address.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `info`, `kong_provider=debug`)
//! - `KONG_PROVIDER_LOG_FORMAT`: `json` for one JSON object per event,
//!   anything else for the compact text format
//!
//! ```bash
//! RUST_LOG=kong_provider=debug KONG_PROVIDER_LOG_FORMAT=json ./kong-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "KONG_PROVIDER_LOG_FORMAT";

/// Output format of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber, defaulting to `info` when `RUST_LOG` is
/// unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different default level.
pub fn init_logging_with_default(default_level: &str) {
    if !install(default_level, LogFormat::from_env()) {
        panic!("a global tracing subscriber is already set");
    }
}

/// Install the global subscriber unless one is already set. Returns whether
/// this call installed it.
pub fn try_init_logging() -> bool {
    install("info", LogFormat::from_env())
}

fn install(default_level: &str, format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(filter(default_level));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Json => registry
            .with(layer.json().with_current_span(true).with_span_list(false))
            .try_init()
            .is_ok(),
        LogFormat::Text => registry.with(layer.compact()).try_init().is_ok(),
    }
}
