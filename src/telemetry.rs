//! Structured logging for duelnet.
//!
//! Thin setup over `tracing-subscriber`:
//! - Console output for development
//! - JSON output for log aggregation
//! - `RUST_LOG`-style filtering via `EnvFilter`

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Service name, included as the default filter target.
    pub service_name: String,
    /// Log level filter (e.g., "info", "debug", "duelnet=debug").
    pub log_level: String,
    /// Output logs as JSON (useful for log aggregation).
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "duelnet".into(),
            log_level: "info".into(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    /// Create a new config with service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set log level filter.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output.
    pub fn with_json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Initialize the tracing subscriber.
///
/// Call this once at application startup. The `RUST_LOG` environment variable
/// overrides the configured level when set.
pub fn init_tracing(config: TracingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        registry.with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact();

        registry.with(fmt_layer).init();
    }
}
