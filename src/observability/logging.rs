//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level. `json` output is meant for
//! production log shipping, anything else prints the human-readable format.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

const DEFAULT_DIRECTIVES: &str = "api_gateway=info,tower_http=info";

/// Build the filter: `RUST_LOG`, then the configured level, then the default.
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| match level {
            Some(level) if !level.trim().is_empty() => EnvFilter::try_new(level),
            _ => EnvFilter::try_new(DEFAULT_DIRECTIVES),
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = env_filter(Some(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Logging already initialized");
    }
}
