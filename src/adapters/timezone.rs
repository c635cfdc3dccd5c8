//! timeapi.io timezone adapter
//!
//! Timezone data changes at known instants (daylight-saving transitions), so
//! cached entries carry the next transition as their domain expiry and may
//! otherwise live for a week.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::{Adapter, AdapterDefaults, ProxyRequest, RequestInput};
use crate::cache::{CacheKey, DomainExpiryFn};
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

/// timeapi.io zone endpoint
const TIME_API_URL: &str = "https://timeapi.io/api/timezone/zone";

/// Adapter for timeapi.io
#[derive(Debug, Clone)]
pub struct TimezoneAdapter {
    base_url: String,
}

impl Default for TimezoneAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TimezoneAdapter {
    pub fn new() -> Self {
        Self {
            base_url: TIME_API_URL.to_string(),
        }
    }

    /// Points the adapter at another endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_for(&self, zone: &str, force: bool) -> ProxyRequest {
        let key = CacheKey::builder("timezone").param("timeZone", zone).build();
        let spec = RequestSpec::get(&self.base_url).query("timeZone", zone);
        ProxyRequest::new(key, spec, force)
    }
}

impl Adapter for TimezoneAdapter {
    fn name(&self) -> &'static str {
        "timezone"
    }

    fn defaults(&self) -> AdapterDefaults {
        AdapterDefaults {
            requests_per_minute: 10,
            cache_minutes: 7 * 24 * 60,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }

    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError> {
        let zone = input.require("timeZone")?;
        Ok(self.request_for(&zone, input.force()))
    }

    fn domain_expiry(&self) -> Option<DomainExpiryFn> {
        Some(Arc::new(next_transition))
    }

    fn preload_request(&self, item: &str) -> Option<ProxyRequest> {
        let zone = item.trim();
        (!zone.is_empty()).then(|| self.request_for(zone, false))
    }
}

/// Next daylight-saving transition announced by a timeapi.io payload
///
/// While DST is active the next change is `dstInterval.dstEnd`, otherwise
/// `dstInterval.dstStart`. Zones without DST have no transition.
pub fn next_transition(payload: &Value) -> Option<DateTime<Utc>> {
    let has_dst = payload
        .get("hasDayLightSaving")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let interval = payload.get("dstInterval").filter(|v| v.is_object())?;
    if !has_dst {
        return None;
    }

    let active = payload
        .get("isDayLightSavingActive")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let field = if active { "dstEnd" } else { "dstStart" };
    let raw = interval.get(field).and_then(Value::as_str)?;

    let parsed = parse_boundary(raw);
    if parsed.is_none() {
        warn!(field, value = raw, "Unparseable DST boundary, ignoring");
    }
    parsed
}

/// Parses an ISO 8601 instant; values without an offset are read as UTC
fn parse_boundary(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
