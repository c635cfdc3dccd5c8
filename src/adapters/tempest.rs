//! WeatherFlow Tempest forecast adapter

use serde_json::{json, Map, Value};

use super::{Adapter, ProxyRequest, RequestInput};
use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

const BETTER_FORECAST_URL: &str = "https://swd.weatherflow.com/swd/rest/better_forecast";

/// Unit fields and the values each accepts
const UNIT_FIELDS: &[(&str, &[&str])] = &[
    ("units_temp", &["c", "f"]),
    ("units_wind", &["mph", "kph", "m/s"]),
    ("units_pressure", &["mb", "inHg"]),
    ("units_precip", &["in", "mm"]),
    ("units_distance", &["mi", "km"]),
];

const CURRENT_FIELDS: &[&str] = &[
    "air_temperature",
    "icon",
    "conditions",
    "feels_like",
    "relative_humidity",
    "station_pressure",
    "precip_probability",
    "wind_gust",
];

const DAILY_FIELDS: &[&str] = &[
    "day_start_local",
    "air_temp_high",
    "air_temp_low",
    "conditions",
    "day_num",
    "month_num",
    "precip_probability",
    "precip_type",
    "icon",
    "precip_icon",
];

/// Days of forecast returned to clients
const FORECAST_DAYS: usize = 4;

#[derive(Debug, Clone)]
pub struct TempestAdapter {
    base_url: String,
}

impl Default for TempestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TempestAdapter {
    pub fn new() -> Self {
        Self {
            base_url: BETTER_FORECAST_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn pick(source: &Value, fields: &[&str]) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|field| (field.to_string(), source[*field].clone()))
        .collect();
    Value::Object(map)
}

impl Adapter for TempestAdapter {
    fn name(&self) -> &'static str {
        "tempest"
    }

    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError> {
        let station_id = input.require("station_id")?;
        let mut units = Vec::with_capacity(UNIT_FIELDS.len());
        for (name, allowed) in UNIT_FIELDS {
            units.push((*name, input.require_one_of(name, allowed)?));
        }
        let api_key = input.require("api_key")?;

        let mut key = CacheKey::builder("tempest").param("station_id", &station_id);
        let mut spec = RequestSpec::get(&self.base_url).query("station_id", station_id);
        for (name, value) in units {
            key = key.param(name, &value);
            spec = spec.query(name, value);
        }
        let key = key.credential("api_key", &api_key).build();
        let spec = spec.query("api_key", api_key);

        Ok(ProxyRequest::new(key, spec, input.force()))
    }

    fn shape(&self, payload: Value, _request: &ProxyRequest) -> Value {
        let current = match payload.get("current_conditions") {
            Some(conditions) => pick(conditions, CURRENT_FIELDS),
            None => json!({}),
        };
        let daily: Vec<Value> = payload["forecast"]["daily"]
            .as_array()
            .map(|days| {
                days.iter()
                    .take(FORECAST_DAYS)
                    .map(|day| pick(day, DAILY_FIELDS))
                    .collect()
            })
            .unwrap_or_default();

        json!({
            "current_conditions": current,
            "forecast": { "daily": daily },
        })
    }
}
