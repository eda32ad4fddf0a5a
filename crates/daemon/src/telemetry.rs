// Logging initialisation
//
// Console logging through tracing-subscriber with an EnvFilter.
// Filter precedence: RUST_LOG, then LOG_LEVEL (applied to the status_pusher crates), then the
// settings file, then the default.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when nothing else is configured
pub const DEFAULT_LOG_FILTER: &str = "status_pusher=info";

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info", "status_pusher=debug")
    pub log_filter: Option<String>,
    /// Include the event target in output
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "status-pusher".to_string(),
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG`: Full filter directive
    /// - `LOG_LEVEL`: Level for the status_pusher crates (e.g., "debug")
    pub fn from_env() -> Self {
        let log_filter = std::env::var("RUST_LOG").ok().or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .map(|level| format!("status_pusher={level}"))
        });
        Self {
            log_filter,
            ..Default::default()
        }
    }

    /// Use `filter` unless the environment already provided one
    pub fn with_fallback_filter(mut self, filter: Option<&str>) -> Self {
        if self.log_filter.is_none() {
            self.log_filter = filter.map(str::to_string);
        }
        self
    }

    fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber
///
/// Returns an error if a subscriber is already installed.
pub fn init_telemetry(
    config: &TelemetryConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_filter(config.env_filter());

    tracing_subscriber::registry().with(console_layer).try_init()?;

    tracing::debug!(service = %config.service_name, "logging initialised");
    Ok(())
}
