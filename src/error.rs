//! Request-level error taxonomy and its HTTP mapping
//!
//! Every failure a proxy request can hit ends here and is turned into a JSON
//! `{error, message}` body. Nothing in this enum is fatal to the process.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::upstream::UpstreamError;

/// Failure of a single proxied request
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client exhausted its request budget
    #[error("Rate limit exceeded: {limit}")]
    RateLimited { retry_after: Duration, limit: String },

    /// A required request field is absent
    #[error("{0}")]
    MissingParameter(String),

    /// A request field has an unusable value
    #[error("{0}")]
    InvalidParameter(String),

    /// The deployment is missing something the request needs (e.g. a secret file)
    #[error("{0}")]
    Configuration(String),

    /// The upstream call failed and no fallback applied
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ProxyError {
    /// Shorthand for a missing `name` field
    pub fn missing(name: &str) -> Self {
        ProxyError::MissingParameter(format!("{} parameter is required", name))
    }

    /// Shorthand for a field that must be one of `allowed`
    pub fn not_one_of(name: &str, value: &str, allowed: &[&str]) -> Self {
        ProxyError::InvalidParameter(format!(
            "{} must be one of {}, got '{}'",
            name,
            allowed.join(", "),
            value
        ))
    }

    /// HTTP status returned to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::MissingParameter(_) | ProxyError::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(err) if err.is_transient() => StatusCode::BAD_GATEWAY,
            ProxyError::Upstream(err) => err
                .status()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }

    /// Machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::RateLimited { .. } => "rate_limit_exceeded",
            ProxyError::MissingParameter(_) => "missing_parameter",
            ProxyError::InvalidParameter(_) => "invalid_parameter",
            ProxyError::Configuration(_) => "configuration_error",
            ProxyError::Upstream(err) if err.is_transient() => "upstream_unavailable",
            ProxyError::Upstream(_) => "upstream_error",
        }
    }

    /// Human-readable explanation
    pub fn message(&self) -> String {
        match self {
            ProxyError::RateLimited { retry_after, .. } => {
                format!("Try again in {} seconds", retry_after.as_secs())
            }
            ProxyError::Upstream(UpstreamError::Http { status, body, .. }) => {
                format!("Upstream API error ({}): {}", status, body)
            }
            ProxyError::Upstream(err) => format!("Proxy error: {}", err),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();

        if status.is_server_error() {
            error!(status = %status, error = self.code(), message = %message, "Request failed");
        } else {
            warn!(status = %status, error = self.code(), message = %message, "Request rejected");
        }

        match self {
            ProxyError::RateLimited { retry_after, limit } => {
                let body = json!({
                    "error": "rate_limit_exceeded",
                    "message": message,
                    "limit": limit,
                });
                let mut response = (status, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
                if let Ok(value) = HeaderValue::from_str(&limit) {
                    headers.insert("x-ratelimit-limit", value);
                }
                response
            }
            other => {
                let body = json!({ "error": other.code(), "message": message });
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_bad_requests() {
        let missing = ProxyError::missing("timeZone");
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.code(), "missing_parameter");
        assert_eq!(missing.message(), "timeZone parameter is required");

        let invalid = ProxyError::not_one_of("units_temp", "k", &["c", "f"]);
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.code(), "invalid_parameter");
        assert_eq!(invalid.message(), "units_temp must be one of c, f, got 'k'");
    }

    #[test]
    fn test_transient_upstream_maps_to_bad_gateway() {
        let err = ProxyError::from(UpstreamError::Network("connection refused".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "upstream_unavailable");

        let err = ProxyError::from(UpstreamError::http(503, "maintenance", None));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_permanent_upstream_keeps_its_status() {
        let err = ProxyError::from(UpstreamError::http(404, "unknown zone", None));

        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "upstream_error");
        assert!(err.message().contains("unknown zone"));
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let err = ProxyError::RateLimited {
            retry_after: Duration::from_secs(42),
            limit: "5/minute".to_string(),
        };

        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(response.headers()["x-ratelimit-limit"], "5/minute");
    }

    #[test]
    fn test_configuration_error_is_internal() {
        let err = ProxyError::Configuration("secret file not found".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "configuration_error");
    }
}
