//! Single-attempt HTTP transport
//!
//! A [`Transport`] performs exactly one request and classifies the outcome.
//! Retrying, timeouts and backoff live one level up in
//! [`UpstreamClient`](super::UpstreamClient), which lets tests swap the
//! network for a scripted stub.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde_json::Value;

use super::error::UpstreamError;
use super::request::{Method, RequestSpec};

/// User agent sent with every upstream request
const USER_AGENT: &str = concat!("orbs-proxy/", env!("CARGO_PKG_VERSION"));

/// Performs one upstream request
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `spec` once and returns the decoded JSON payload
    async fn send(&self, spec: &RequestSpec) -> Result<Value, UpstreamError>;
}

/// Transport over a pooled reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, spec: &RequestSpec) -> Result<Value, UpstreamError> {
        let mut request = match spec.method {
            Method::Get => self.client.get(&spec.url),
            Method::Post => self.client.post(&spec.url),
        };
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers(), Utc::now());
        let text = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            return Err(UpstreamError::http(status.as_u16(), &text, retry_after));
        }
        parse_payload(&text)
    }
}

fn network_error(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Network(format!("request timed out: {}", error))
    } else {
        UpstreamError::Network(error.to_string())
    }
}

/// Decodes a success body, rejecting bodies that carry no data
pub(crate) fn parse_payload(text: &str) -> Result<Value, UpstreamError> {
    if text.trim().is_empty() {
        return Err(UpstreamError::EmptyResponse);
    }
    let payload: Value =
        serde_json::from_str(text).map_err(|e| UpstreamError::InvalidPayload(e.to_string()))?;
    match &payload {
        Value::Null => Err(UpstreamError::EmptyResponse),
        Value::Object(map) if map.is_empty() => Err(UpstreamError::EmptyResponse),
        _ => Ok(payload),
    }
}

/// Reads `Retry-After` as either delta-seconds or an HTTP date
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((when - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5)).expect("client builds")
    }

    #[test]
    fn test_parse_payload_rejects_empty_bodies() {
        assert_eq!(parse_payload(""), Err(UpstreamError::EmptyResponse));
        assert_eq!(parse_payload("  \n"), Err(UpstreamError::EmptyResponse));
        assert_eq!(parse_payload("null"), Err(UpstreamError::EmptyResponse));
        assert_eq!(parse_payload("{}"), Err(UpstreamError::EmptyResponse));
        assert!(matches!(
            parse_payload("<html>"),
            Err(UpstreamError::InvalidPayload(_))
        ));
        assert_eq!(parse_payload("[1]"), Ok(json!([1])));
    }

    #[test]
    fn test_parse_retry_after_seconds_and_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut headers = HeaderMap::new();

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(12)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Fri, 01 Mar 2024 12:00:30 GMT"),
        );
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(30)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, now), None);
    }

    #[tokio::test]
    async fn test_get_sends_query_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/timezone/zone"))
            .and(query_param("timeZone", "Europe/Berlin"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"timeZone": "Europe/Berlin"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let spec = RequestSpec::get(format!("{}/api/timezone/zone", server.uri()))
            .query("timeZone", "Europe/Berlin");
        let payload = transport().send(&spec).await.expect("request succeeds");

        assert_eq!(payload["timeZone"], "Europe/Berlin");
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/performance"))
            .and(body_json(json!({"portfolioIds": ["abc"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let spec = RequestSpec::post(
            format!("{}/performance", server.uri()),
            json!({"portfolioIds": ["abc"]}),
        );

        assert_eq!(transport().send(&spec).await, Ok(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_error_status_carries_body_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "7")
                    .set_body_string("too many"),
            )
            .mount(&server)
            .await;

        let spec = RequestSpec::get(server.uri());
        let err = transport().send(&spec).await.unwrap_err();

        assert_eq!(
            err,
            UpstreamError::Http {
                status: 429,
                body: "too many".to_string(),
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[tokio::test]
    async fn test_slow_upstream_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"late": true}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_millis(50)).unwrap();
        let err = transport.send(&RequestSpec::get(server.uri())).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Network(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 on localhost has nothing listening in test environments
        let spec = RequestSpec::get("http://127.0.0.1:9/");
        let err = transport().send(&spec).await.unwrap_err();

        assert!(err.is_transient());
        assert!(matches!(err, UpstreamError::Network(_)));
    }
}
