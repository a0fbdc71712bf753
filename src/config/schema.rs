//! Configuration schema definitions.
//!
//! Every section is `#[serde(default)]`, so an empty file (or no file at
//! all) yields a runnable gateway.

use serde::{Deserialize, Serialize};

use crate::composite::StaticRoutes;
use crate::error::{GatewayError, GatewayResult};
use crate::routing::{PathPattern, ProtectedRoutes, Tier};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, base path).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Tier secrets and signature settings.
    pub auth: AuthConfig,

    /// Request forwarding limits.
    pub forwarding: ForwardingConfig,

    /// Directory identity and optional descriptor file.
    pub directory: DirectoryConfig,

    /// Gateway-declared protected routes.
    pub static_routes: Vec<StaticRouteConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Compile `static_routes` into per-service tables, in declaration order.
    pub fn static_route_table(&self) -> GatewayResult<StaticRoutes> {
        let mut table = StaticRoutes::new();
        for route in &self.static_routes {
            let tier = Tier::parse(&route.tier).ok_or_else(|| GatewayError::UnknownTier {
                service: route.service.clone(),
                tier: route.tier.clone(),
            })?;
            let pattern = PathPattern::compile(&route.pattern)?;
            table
                .entry(route.service.clone())
                .or_insert_with(ProtectedRoutes::new)
                .push(&route.method, pattern, tier);
        }
        Ok(table)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Prefix for the whole gateway surface ("" mounts at the root).
    pub base_path: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            base_path: String::new(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Blanket request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 180 }
    }
}

/// Authorization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Deployment environment (`local`, `development`, `production`, ...).
    pub environment: String,

    /// HMAC key of the protect tier.
    pub secret: String,

    /// HMAC key of the strict tier.
    pub strict_secret: String,

    /// Digest key of the private tier.
    pub private_secret: String,

    /// Explicit signature switch; unset means "derive from environment".
    pub use_signature: Option<bool>,

    /// Locale of error messages (`en` or `id`).
    pub locale: String,

    /// Replacement for the built-in legacy strict-tier token.
    pub legacy_token: Option<String>,
}

impl AuthConfig {
    /// Signatures are checked unless disabled explicitly or running locally.
    pub fn signature_enabled(&self) -> bool {
        match self.use_signature {
            Some(enabled) => enabled,
            None => !matches!(
                self.environment.to_ascii_lowercase().as_str(),
                "local" | "development"
            ),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            secret: String::new(),
            strict_secret: String::new(),
            private_secret: String::new(),
            use_signature: None,
            locale: crate::auth::DEFAULT_LOCALE.to_string(),
            legacy_token: None,
        }
    }
}

/// Forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Largest request body buffered for authorization and dispatch.
    pub max_body_bytes: usize,

    /// Largest backend reply buffered for envelope checks and dispatch.
    pub max_reply_bytes: usize,

    /// Right-most X-Forwarded-For entries to ignore during real-IP recovery.
    pub skip_forwarded_for: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            max_reply_bytes: crate::rpc::client::DEFAULT_MAX_REPLY_BYTES,
            skip_forwarded_for: 0,
        }
    }
}

/// Directory configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Name the gateway announces in handshakes; empty uses the hostname.
    pub key: String,

    /// TOML file of service descriptors and caller credentials.
    pub file: Option<String>,
}

/// A gateway-side protected route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticRouteConfig {
    /// Service key the route belongs to.
    pub service: String,

    pub method: String,

    /// Route template, e.g. "/users/{id}".
    pub pattern: String,

    /// `protect`, `strict` or `private`.
    pub tier: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directives.
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "api_gateway=info,tower_http=info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.timeouts.request_secs, 180);
        assert_eq!(config.auth.locale, "en");
        assert!(config.auth.signature_enabled());
        assert!(config.static_routes.is_empty());
    }

    #[test]
    fn test_signature_follows_environment() {
        let mut auth = AuthConfig::default();
        auth.environment = "Development".into();
        assert!(!auth.signature_enabled());
        auth.use_signature = Some(true);
        assert!(auth.signature_enabled());
    }

    #[test]
    fn test_static_route_table() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[static_routes]]
            service = "users"
            method = "delete"
            pattern = "/users/{id}"
            tier = "private"

            [[static_routes]]
            service = "users"
            method = "GET"
            pattern = "/users/{id}"
            tier = "strict"
            "#,
        )
        .unwrap();

        let table = config.static_route_table().unwrap();
        let users = &table["users"];
        assert_eq!(users.classify("DELETE", "/users/7"), Some(Tier::Private));
        assert_eq!(users.classify("GET", "/users/7/"), Some(Tier::Strict));
        assert_eq!(users.classify("GET", "/users"), None);
    }

    #[test]
    fn test_malformed_static_template_is_fatal() {
        let mut config = GatewayConfig::default();
        config.static_routes.push(StaticRouteConfig {
            service: "users".into(),
            method: "GET".into(),
            pattern: "/users/{id".into(),
            tier: "protect".into(),
        });
        let err = config.static_route_table().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_static_tier_is_configuration_error() {
        let mut config = GatewayConfig::default();
        config.static_routes.push(StaticRouteConfig {
            service: "users".into(),
            method: "GET".into(),
            pattern: "/users/{id}".into(),
            tier: "admin".into(),
        });
        let err = config.static_route_table().unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTier { ref tier, .. } if tier == "admin"));
        assert!(err.is_configuration());
    }
}
