//! Configuration loading: TOML file, then environment overrides, then validation.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load a TOML file, apply process environment overrides, validate.
///
/// `None` starts from defaults.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay `APP_*` variables returned by `lookup` onto `config`.
pub fn apply_env_overrides(config: &mut GatewayConfig, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(env) = var("APP_ENV") {
        config.auth.environment = env;
    }
    if let Some(port) = var("APP_PORT") {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{}:{}", host, port.trim());
    }
    if let Some(endpoint) = var("APP_ENDPOINT") {
        config.listener.base_path = normalize_base_path(&endpoint);
    }
    if let Some(key) = var("APP_KEY_GATEWAY") {
        config.directory.key = key;
    }
    if let Some(secret) = var("APP_SECRET") {
        config.auth.secret = secret;
    }
    if let Some(secret) = var("APP_STRICT_SECRET") {
        config.auth.strict_secret = secret;
    }
    if let Some(secret) = var("APP_PRIVATE_SECRET") {
        config.auth.private_secret = secret;
    }
    if let Some(skip) = var("DEFAULT_SKIP_FORWARDED_FOR") {
        match skip.trim().parse() {
            Ok(skip) => config.forwarding.skip_forwarded_for = skip,
            Err(_) => tracing::warn!(value = %skip, "Ignoring non-numeric DEFAULT_SKIP_FORWARDED_FOR"),
        }
    }
    if let Some(locale) = var("APP_LOCALE") {
        config.auth.locale = locale.to_ascii_lowercase();
    }
}

/// `api/` and `/api/` both become `/api`; `/` becomes empty.
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("APP_ENV", "local"),
                ("APP_PORT", "9000"),
                ("APP_ENDPOINT", "api/"),
                ("APP_KEY_GATEWAY", "gateway-1"),
                ("APP_SECRET", "p"),
                ("APP_STRICT_SECRET", "s"),
                ("APP_PRIVATE_SECRET", "x"),
                ("DEFAULT_SKIP_FORWARDED_FOR", "2"),
                ("APP_LOCALE", "ID"),
            ]),
        );

        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.listener.base_path, "/api");
        assert_eq!(config.directory.key, "gateway-1");
        assert_eq!(config.auth.secret, "p");
        assert_eq!(config.auth.strict_secret, "s");
        assert_eq!(config.auth.private_secret, "x");
        assert_eq!(config.forwarding.skip_forwarded_for, 2);
        assert_eq!(config.auth.locale, "id");
        assert!(!config.auth.signature_enabled());
    }

    #[test]
    fn test_blank_and_invalid_values_ignored() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[("APP_SECRET", "  "), ("DEFAULT_SKIP_FORWARDED_FOR", "many")]),
        );
        assert_eq!(config.auth.secret, "");
        assert_eq!(config.forwarding.skip_forwarded_for, 0);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[listener]\nbind_address = \"127.0.0.1:8181\"\n\n[timeouts]\nrequest_secs = 30"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.timeouts.request_secs, 30);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener\nbind_address = 1").unwrap();
        assert!(matches!(load_config(Some(file.path())), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("gw"), "/gw");
        assert_eq!(normalize_base_path("/gw/v1/"), "/gw/v1");
    }
}
