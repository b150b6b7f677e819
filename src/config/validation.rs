//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, addresses parse)
//! - Check bus URLs and header names are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use url::Url;

use crate::config::schema::RouterConfig;

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

pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    if config.bus.servers.is_empty() {
        errors.push(ValidationError::new("bus.servers", "at least one server is required"));
    }
    for server in &config.bus.servers {
        match Url::parse(server) {
            Ok(url) if url.scheme() == "nats" && url.host_str().is_some() => {}
            Ok(_) => errors.push(ValidationError::new(
                "bus.servers",
                format!("'{}' must be a nats:// URL with a host", server),
            )),
            Err(e) => errors.push(ValidationError::new("bus.servers", format!("'{}': {}", server, e))),
        }
    }
    if config.bus.ping_interval_secs == 0 {
        errors.push(ValidationError::new("bus.ping_interval_secs", "must be > 0"));
    }
    if config.bus.reconnect_base_ms == 0 || config.bus.reconnect_max_ms < config.bus.reconnect_base_ms {
        errors.push(ValidationError::new(
            "bus.reconnect_max_ms",
            "reconnect delays must be > 0 with max >= base",
        ));
    }

    if config.registry.stale_threshold_secs == 0 {
        errors.push(ValidationError::new("registry.stale_threshold_secs", "must be > 0"));
    }
    if config.registry.prune_interval_secs == 0 {
        errors.push(ValidationError::new("registry.prune_interval_secs", "must be > 0"));
    }

    if HeaderName::from_bytes(config.lookup.instance_header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "lookup.instance_header",
            format!("'{}' is not a valid header name", config.lookup.instance_header),
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

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
