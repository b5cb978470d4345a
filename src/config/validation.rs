//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.timeouts.provider_secs == 0 {
        errors.push(ValidationError::new("timeouts.provider_secs", "must be > 0"));
    }
    if config.timeouts.storage_acquire_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.storage_acquire_secs",
            "must be > 0",
        ));
    }

    if config.database.url.is_empty() {
        errors.push(ValidationError::new("database.url", "must not be empty"));
    }
    if config.database.max_connections == 0 {
        errors.push(ValidationError::new("database.max_connections", "must be > 0"));
    }

    if url::Url::parse(&config.provider.base_url).is_err() {
        errors.push(ValidationError::new(
            "provider.base_url",
            format!("'{}' is not a valid URL", config.provider.base_url),
        ));
    }
    if config.provider.country_codes.is_empty() {
        errors.push(ValidationError::new(
            "provider.country_codes",
            "at least one country code is required",
        ));
    }

    if config.encryption.key_name.trim().is_empty() {
        errors.push(ValidationError::new("encryption.key_name", "must not be empty"));
    }

    if !config.webhooks.path.starts_with('/') {
        errors.push(ValidationError::new("webhooks.path", "must start with '/'"));
    }
    if config.webhooks.max_body_bytes == 0 {
        errors.push(ValidationError::new("webhooks.max_body_bytes", "must be > 0"));
    }

    if config.sync.page_size == 0 || config.sync.page_size > 500 {
        errors.push(ValidationError::new("sync.page_size", "must be within 1..=500"));
    }
    if config.sync.max_pages == 0 {
        errors.push(ValidationError::new("sync.max_pages", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.len() < 16 {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be at least 16 characters when the admin API is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
