//! Visual Crossing timeline weather adapter

use reqwest::Url;
use serde_json::{json, Value};

use super::{Adapter, DefaultKey, ProxyRequest, RequestInput, Secrets};
use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

const TIMELINE_URL: &str =
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline";

const DEFAULT_KEY_PLACEHOLDER: &str = "VISUALCROSSING_DEFAULT_API_KEY";

const UNIT_GROUPS: &[&str] = &["us", "uk", "metric", "base"];

/// Adapter for Visual Crossing; location and timeframe come from the path
#[derive(Debug, Clone)]
pub struct VisualCrossingAdapter {
    base_url: String,
    default_key: DefaultKey,
}

impl VisualCrossingAdapter {
    pub fn new(secrets: Secrets) -> Self {
        Self {
            base_url: TIMELINE_URL.to_string(),
            default_key: secrets.load(DEFAULT_KEY_PLACEHOLDER),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Appends the location and timeframe as escaped path segments
    fn timeline_url(&self, location: &str, timeframe: &str) -> Result<String, ProxyError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProxyError::Configuration(format!("Invalid upstream URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProxyError::Configuration("Upstream URL cannot take a path".to_string()))?
            .pop_if_empty()
            .push(location)
            .push(timeframe);
        Ok(url.to_string())
    }
}

impl Adapter for VisualCrossingAdapter {
    fn name(&self) -> &'static str {
        "visualcrossing"
    }

    fn route(&self) -> &'static str {
        "/proxy/:location/:timeframe"
    }

    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError> {
        let location = input.path_param("location")?;
        let timeframe = input.path_param("timeframe")?;
        let unit_group = match input.field("unitGroup") {
            Some(value) if UNIT_GROUPS.contains(&value.as_str()) => value,
            Some(value) => return Err(ProxyError::not_one_of("unitGroup", &value, UNIT_GROUPS)),
            None => "us".to_string(),
        };
        let include = input
            .field("include")
            .unwrap_or_else(|| "days,current".to_string());
        let icon_set = input.field("iconSet").unwrap_or_else(|| "icons1".to_string());
        let lang = input.field("lang").unwrap_or_else(|| "en".to_string());
        let api_key = input
            .field("key")
            .ok_or_else(|| ProxyError::MissingParameter("API key is required".to_string()))?;
        let api_key = self.default_key.resolve(api_key)?;

        let key = CacheKey::builder("visualcrossing")
            .param("location", &location)
            .param("timeframe", &timeframe)
            .param("unitGroup", &unit_group)
            .param("include", &include)
            .param("iconSet", &icon_set)
            .param("lang", &lang)
            .credential("key", &api_key)
            .build();
        let spec = RequestSpec::get(self.timeline_url(&location, &timeframe)?)
            .query("key", api_key)
            .query("unitGroup", unit_group)
            .query("include", include)
            .query("iconSet", icon_set)
            .query("lang", lang);

        Ok(ProxyRequest::new(key, spec, input.force()))
    }

    fn shape(&self, payload: Value, _request: &ProxyRequest) -> Value {
        let current = &payload["currentConditions"];
        let days: Vec<Value> = payload["days"]
            .as_array()
            .map(|days| {
                days.iter()
                    .map(|day| {
                        json!({
                            "description": day["description"],
                            "icon": day["icon"],
                            "tempmax": day["tempmax"],
                            "tempmin": day["tempmin"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        json!({
            "resolvedAddress": payload["resolvedAddress"],
            "currentConditions": {
                "temp": current["temp"],
                "icon": current["icon"],
            },
            "days": days,
        })
    }
}
