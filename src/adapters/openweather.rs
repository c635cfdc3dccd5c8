//! OpenWeather One Call 3.0 adapter

use super::{Adapter, AdapterDefaults, ProxyRequest, RequestInput};
use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Adapter for OpenWeather; payloads are passed through unchanged
#[derive(Debug, Clone)]
pub struct OpenWeatherAdapter {
    base_url: String,
    default_key: Option<String>,
}

impl OpenWeatherAdapter {
    /// Creates the adapter; `default_key` is used when a request has no `appid`
    pub fn new(default_key: Option<String>) -> Self {
        Self {
            base_url: ONE_CALL_URL.to_string(),
            default_key: default_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn coordinate(input: &RequestInput, name: &str) -> Result<String, ProxyError> {
    let raw = input.field(name).ok_or_else(|| {
        ProxyError::MissingParameter("lat and lon parameters are required".to_string())
    })?;
    raw.parse::<f64>()
        .map_err(|_| ProxyError::InvalidParameter(format!("{} must be a number, got '{}'", name, raw)))?;
    Ok(raw)
}

impl Adapter for OpenWeatherAdapter {
    fn name(&self) -> &'static str {
        "openweather"
    }

    fn defaults(&self) -> AdapterDefaults {
        AdapterDefaults {
            cache_minutes: 15,
            ..AdapterDefaults::default()
        }
    }

    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError> {
        let lat = coordinate(input, "lat")?;
        let lon = coordinate(input, "lon")?;
        let units = input.field("units").unwrap_or_else(|| "imperial".to_string());
        let exclude = input
            .field("exclude")
            .unwrap_or_else(|| "minutely,hourly,alerts".to_string());
        let lang = input.field("lang").unwrap_or_else(|| "en".to_string());
        let cnt = input.field("cnt").unwrap_or_else(|| "3".to_string());
        let appid = input
            .field("appid")
            .or_else(|| self.default_key.clone())
            .ok_or_else(|| {
                ProxyError::MissingParameter(
                    "API key is required and no default key is configured".to_string(),
                )
            })?;

        let key = CacheKey::builder("openweather")
            .param("lat", &lat)
            .param("lon", &lon)
            .param("units", &units)
            .param("exclude", &exclude)
            .param("lang", &lang)
            .param("cnt", &cnt)
            .credential("appid", &appid)
            .build();
        let spec = RequestSpec::get(&self.base_url)
            .query("lat", lat)
            .query("lon", lon)
            .query("units", units)
            .query("exclude", exclude)
            .query("lang", lang)
            .query("cnt", cnt)
            .query("appid", appid);

        Ok(ProxyRequest::new(key, spec, input.force()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let adapter = OpenWeatherAdapter::new(Some("default-key".into()));

        let request = adapter
            .parse(&RequestInput::from_query([("lat", "49.28"), ("lon", "-123.12")]))
            .unwrap();

        let spec = &request.spec;
        assert_eq!(spec.query_value("units"), Some("imperial"));
        assert_eq!(spec.query_value("exclude"), Some("minutely,hourly,alerts"));
        assert_eq!(spec.query_value("lang"), Some("en"));
        assert_eq!(spec.query_value("cnt"), Some("3"));
        assert_eq!(spec.query_value("appid"), Some("default-key"));
    }

    #[test]
    fn test_missing_coordinates() {
        let adapter = OpenWeatherAdapter::new(Some("k".into()));

        let err = adapter
            .parse(&RequestInput::from_query([("lat", "49.28")]))
            .unwrap_err();

        assert_eq!(err.code(), "missing_parameter");
    }

    #[test]
    fn test_non_numeric_coordinate() {
        let adapter = OpenWeatherAdapter::new(Some("k".into()));

        let err = adapter
            .parse(&RequestInput::from_query([("lat", "north"), ("lon", "1")]))
            .unwrap_err();

        assert_eq!(err.code(), "invalid_parameter");
    }

    #[test]
    fn test_missing_key_without_default() {
        let adapter = OpenWeatherAdapter::new(None);

        let err = adapter
            .parse(&RequestInput::from_query([("lat", "1"), ("lon", "2")]))
            .unwrap_err();

        assert_eq!(
            err.message(),
            "API key is required and no default key is configured"
        );
    }

    #[test]
    fn test_key_ignores_force() {
        let adapter = OpenWeatherAdapter::new(None);
        let a = adapter
            .parse(&RequestInput::from_query([
                ("lat", "1"),
                ("lon", "2"),
                ("appid", "first"),
            ]))
            .unwrap();
        let b = adapter
            .parse(&RequestInput::from_query([
                ("lat", "1"),
                ("lon", "2"),
                ("appid", "first"),
                ("force", "true"),
            ]))
            .unwrap();

        assert_eq!(a.key, b.key);
        assert!(b.force);
    }

    #[test]
    fn test_appid_changes_key_without_appearing_in_it() {
        let adapter = OpenWeatherAdapter::new(Some("default-key".into()));
        let parse = |pairs: &[(&str, &str)]| {
            adapter
                .parse(&RequestInput::from_query(pairs.iter().copied()))
                .unwrap()
                .key
        };

        let first = parse(&[("lat", "1"), ("lon", "2"), ("appid", "first")]);
        let second = parse(&[("lat", "1"), ("lon", "2"), ("appid", "second")]);
        let default = parse(&[("lat", "1"), ("lon", "2")]);

        assert_ne!(first, second);
        assert_eq!(default, parse(&[("lat", "1"), ("lon", "2"), ("appid", "default-key")]));
        assert!(!first.as_str().contains("first"));
    }

    #[test]
    fn test_units_change_key() {
        let adapter = OpenWeatherAdapter::new(Some("k".into()));
        let imperial = adapter
            .parse(&RequestInput::from_query([("lat", "1"), ("lon", "2")]))
            .unwrap();
        let metric = adapter
            .parse(&RequestInput::from_query([
                ("lat", "1"),
                ("lon", "2"),
                ("units", "metric"),
            ]))
            .unwrap();

        assert_ne!(imperial.key, metric.key);
    }
}
