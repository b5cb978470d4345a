//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load from `path` if given, otherwise start from defaults. Environment
/// overrides and validation apply either way.
pub fn load_or_default(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = ServiceConfig::default();
            apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Parse, apply environment overrides and validate a TOML document.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let mut config: ServiceConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Secrets come from the environment when present.
pub fn apply_env_overrides<F>(config: &mut ServiceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(client_id) = lookup("PROVIDER_CLIENT_ID") {
        config.provider.client_id = client_id;
    }
    if let Some(secret) = lookup("PROVIDER_SECRET") {
        config.provider.secret = secret;
    }
    if let Some(api_key) = lookup("ADMIN_API_KEY") {
        config.admin.api_key = api_key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[listener]
bind_address = "127.0.0.1:9000"

[webhooks]
reclaim_after_secs = 30
dedup_window_secs = 0
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.webhooks.reclaim_after_secs, 30);
        assert_eq!(config.webhooks.dedup_window_secs, 0);
        // Untouched sections keep their defaults
        assert_eq!(config.webhooks.path, "/webhooks/provider");
        assert_eq!(config.sync.page_size, 250);
    }

    #[test]
    fn test_parse_error_reported() {
        let err = parse_config("listener = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors_reported() {
        let err = parse_config(
            r#"
[timeouts]
provider_secs = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeouts.provider_secs"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            "PROVIDER_SECRET" => Some("env-secret".to_string()),
            "ADMIN_API_KEY" => Some("env-admin".to_string()),
            _ => None,
        });
        assert_eq!(config.provider.secret, "env-secret");
        assert_eq!(config.admin.api_key, "env-admin");
        assert!(config.provider.client_id.is_empty());
    }
}
