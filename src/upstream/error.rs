//! Upstream failure kinds

use std::time::Duration;

use thiserror::Error;

/// Maximum number of body bytes kept on an HTTP error
const MAX_ERROR_BODY: usize = 512;

/// A failed upstream call
///
/// `Clone` so a single coalesced result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The upstream answered with a non-success status
    #[error("Upstream returned HTTP {status}")]
    Http {
        status: u16,
        body: String,
        /// Wait hint from a `Retry-After` header
        retry_after: Option<Duration>,
    },

    /// Connection, DNS, TLS or timeout failure
    #[error("Upstream unreachable: {0}")]
    Network(String),

    /// Success status but nothing usable in the body
    #[error("Upstream returned an empty response")]
    EmptyResponse,

    /// Success status but the body is not JSON
    #[error("Upstream returned an invalid payload: {0}")]
    InvalidPayload(String),
}

impl UpstreamError {
    /// Builds an HTTP error, truncating the body to a loggable size
    pub fn http(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let body = match body.char_indices().nth(MAX_ERROR_BODY) {
            Some((idx, _)) => format!("{}…", &body[..idx]),
            None => body.to_string(),
        };
        UpstreamError::Http {
            status,
            body,
            retry_after,
        }
    }

    /// Whether the failure says "try again later" rather than "bad request"
    ///
    /// Upstream 4xx responses (other than 408 and 429) are permanent: the
    /// request itself was wrong and repeating it cannot help.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Http { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            UpstreamError::Network(_)
            | UpstreamError::EmptyResponse
            | UpstreamError::InvalidPayload(_) => true,
        }
    }

    /// HTTP status reported by the upstream, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Wait hint reported by the upstream, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
