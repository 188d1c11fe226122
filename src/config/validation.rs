//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::http::tokenizer::MAX_HEADERS;

/// One rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
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

/// Smallest head limit that still fits a realistic request line.
const MIN_HEADER_BYTES: usize = 1024;

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if !is_authority(&config.backend.address) {
        errors.push(ValidationError::new(
            "backend.address",
            format!("'{}' is not host:port", config.backend.address),
        ));
    }

    let name = &config.server.name;
    if name.trim().is_empty() || name.chars().any(|c| c.is_control()) {
        errors.push(ValidationError::new(
            "server.name",
            "must be non-empty printable text",
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::new("timeouts.idle_secs", "must be greater than 0"));
    }

    if config.limits.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::new(
            "limits.max_header_bytes",
            format!("must be at least {}", MIN_HEADER_BYTES),
        ));
    }
    if config.limits.max_headers == 0 || config.limits.max_headers > MAX_HEADERS {
        errors.push(ValidationError::new(
            "limits.max_headers",
            format!("must be between 1 and {}", MAX_HEADERS),
        ));
    }
    if config.limits.max_pipeline_depth == 0 {
        errors.push(ValidationError::new("limits.max_pipeline_depth", "must be at least 1"));
    }
    if config.limits.max_buffered_response_bytes == 0 {
        errors.push(ValidationError::new(
            "limits.max_buffered_response_bytes",
            "must be greater than 0",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn is_authority(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".to_string();
        config.backend.address = "backend-without-port".to_string();
        config.timeouts.idle_secs = 0;
        config.limits.max_pipeline_depth = 0;
        config.limits.max_buffered_response_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "listener.bind_address",
                "backend.address",
                "timeouts.idle_secs",
                "limits.max_pipeline_depth",
                "limits.max_buffered_response_bytes",
            ]
        );
    }

    #[test]
    fn test_hostnames_are_accepted_for_backend() {
        let mut config = ProxyConfig::default();
        config.backend.address = "app.internal:8080".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_server_name_must_not_break_headers() {
        let mut config = ProxyConfig::default();
        config.server.name = "evil\r\nSet-Cookie: x".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "server.name");
        assert_eq!(errors[0].to_string(), "server.name: must be non-empty printable text");
    }
}
