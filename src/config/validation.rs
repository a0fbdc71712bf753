//! Configuration validation.
//!
//! Semantic checks only; serde already handled syntax. Every problem is
//! reported, not just the first one.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::routing::{PathPattern, Tier};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }

    let base = &config.listener.base_path;
    if !base.is_empty() && (!base.starts_with('/') || base == "/") {
        errors.push(ValidationError::new(
            "listener.base_path",
            "must be empty or start with '/' followed by a segment",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    if !matches!(config.auth.locale.as_str(), "en" | "id") {
        errors.push(ValidationError::new(
            "auth.locale",
            format!("unsupported locale {:?}", config.auth.locale),
        ));
    }

    if config.forwarding.max_body_bytes == 0 {
        errors.push(ValidationError::new("forwarding.max_body_bytes", "must be greater than zero"));
    }
    if config.forwarding.max_reply_bytes == 0 {
        errors.push(ValidationError::new("forwarding.max_reply_bytes", "must be greater than zero"));
    }

    for (i, route) in config.static_routes.iter().enumerate() {
        let field = |name: &str| format!("static_routes[{}].{}", i, name);
        if route.service.trim().is_empty() {
            errors.push(ValidationError::new(field("service"), "must not be empty"));
        }
        if route.method.trim().is_empty() {
            errors.push(ValidationError::new(field("method"), "must not be empty"));
        }
        if Tier::parse(&route.tier).is_none() {
            errors.push(ValidationError::new(
                field("tier"),
                format!("unknown tier {:?}", route.tier),
            ));
        }
        if let Err(e) = PathPattern::compile(&route.pattern) {
            errors.push(ValidationError::new(field("pattern"), e.to_string()));
        }
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", obs.metrics_address),
        ));
    }
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("expected \"pretty\" or \"json\", got {:?}", obs.log_format),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
