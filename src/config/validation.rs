//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend URLs and listener addresses
//! - Validate value ranges (timeouts > 0, probe timeout < sweep interval,
//!   request timeout > both upstream attempts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use url::Url;

use crate::config::schema::BalancerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("backend hosts expected, none provided")]
    NoBackends,

    #[error("invalid backend url {url:?}: {reason}")]
    InvalidBackend { url: String, reason: String },

    #[error("invalid {field} {value:?}: not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("health_check.timeout_secs ({timeout}) must be shorter than health_check.interval_secs ({interval})")]
    ProbeTimeoutTooLong { timeout: u64, interval: u64 },

    #[error("timeouts.request_secs ({request}) must exceed two upstream attempts of timeouts.upstream_secs ({upstream})")]
    RequestTimeoutTooShort { request: u64, upstream: u64 },
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for raw in &config.backends {
        if let Err(reason) = check_backend_url(raw) {
            errors.push(ValidationError::InvalidBackend {
                url: raw.clone(),
                reason,
            });
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let hc = &config.health_check;
    let positive = [
        ("health_check.interval_secs", hc.interval_secs),
        ("health_check.timeout_secs", hc.timeout_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.shutdown_secs", config.timeouts.shutdown_secs),
        ("retries.max_attempts", u64::from(config.retries.max_attempts)),
        ("limits.max_body_bytes", config.limits.max_body_bytes as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if hc.timeout_secs > 0 && hc.timeout_secs >= hc.interval_secs {
        errors.push(ValidationError::ProbeTimeoutTooLong {
            timeout: hc.timeout_secs,
            interval: hc.interval_secs,
        });
    }

    let t = &config.timeouts;
    if t.upstream_secs > 0 && t.request_secs <= t.upstream_secs.saturating_mul(2) {
        errors.push(ValidationError::RequestTimeoutTooShort {
            request: t.request_secs,
            upstream: t.upstream_secs,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_backend_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    // The upstream client speaks plain HTTP only.
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}
