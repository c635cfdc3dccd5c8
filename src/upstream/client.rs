//! Upstream client with bounded retry and per-attempt timeout

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::error::UpstreamError;
use super::request::RequestSpec;
use super::retry::RetryPolicy;
use super::transport::{HttpTransport, Transport};

/// Calls a third-party API, retrying transient failures
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl UpstreamClient {
    /// Creates a client over an arbitrary transport
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            timeout,
        }
    }

    /// Creates a client that talks HTTP
    pub fn http(policy: RetryPolicy, timeout: Duration) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(timeout)?;
        Ok(Self::new(Arc::new(transport), policy, timeout))
    }

    /// Fetches `spec`, retrying transient failures per the policy
    ///
    /// # Returns
    /// * `Ok(Value)` - Decoded upstream payload
    /// * `Err(UpstreamError)` - The last failure once retries are exhausted, or
    ///   the first non-retryable one
    pub async fn fetch(&self, spec: &RequestSpec) -> Result<Value, UpstreamError> {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.timeout, self.transport.send(spec)).await
            {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Network(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f64()
                ))),
            };

            let error = match result {
                Ok(payload) => {
                    if attempt > 1 {
                        debug!(attempt, request = %spec, "Upstream call succeeded after retry");
                    }
                    return Ok(payload);
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&error) || attempt >= max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    request = %spec,
                    error = %error,
                    "Upstream call failed"
                );
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt, &error);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                request = %spec,
                error = %error,
                "Retrying upstream call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
