//! Parqet portfolio performance adapter
//!
//! The upstream is queried with a POST body. Only the portfolio id and the
//! timeframe reach the upstream, so only they form the cache key; the chosen
//! performance metric and chart series are applied when shaping.

use serde_json::{json, Value};

use super::{Adapter, ProxyRequest, RequestInput};
use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

const ASSEMBLE_URL: &str = "https://api.parqet.com/v1/portfolios/assemble";

const TIMEFRAMES: &[&str] = &[
    "today", "1d", "1w", "1m", "3m", "6m", "1y", "5y", "10y", "mtd", "ytd", "max",
];

const PERF_METRICS: &[&str] = &[
    "returnGross",
    "returnNet",
    "totalReturnGross",
    "totalReturnNet",
    "ttwror",
    "izf",
];

const PERF_CHARTS: &[&str] = &["perfHistory", "perfHistoryUnrealized", "ttwror", "drawdown"];

#[derive(Debug, Clone)]
pub struct ParqetAdapter {
    base_url: String,
}

impl Default for ParqetAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ParqetAdapter {
    pub fn new() -> Self {
        Self {
            base_url: ASSEMBLE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Metric value, 0 when the upstream omits it
fn metric(source: &Value, name: &str) -> Value {
    source.get(name).cloned().unwrap_or(json!(0))
}

fn shape_holding(holding: &Value, perf: &str) -> Option<Value> {
    let asset_type = holding["assetType"].as_str().unwrap_or("").to_lowercase();
    if asset_type != "security" && asset_type != "crypto" {
        return None;
    }
    let position = &holding["position"];
    let sold = position["isSold"].as_bool().unwrap_or(false);
    let no_shares = position["shares"].as_f64() == Some(0.0);
    if sold || no_shares {
        return None;
    }
    let performance = &holding["performance"];
    Some(json!({
        "assetType": asset_type,
        "currency": holding["currency"],
        "id": holding["asset"]["identifier"],
        "name": holding["sharedAsset"]["name"],
        "priceStart": performance["priceAtIntervalStart"],
        "valueStart": performance["purchaseValueForInterval"],
        "priceNow": position["currentPrice"],
        "valueNow": position["currentValue"],
        "shares": position["shares"],
        "perf": metric(performance, perf),
    }))
}

impl Adapter for ParqetAdapter {
    fn name(&self) -> &'static str {
        "parqet"
    }

    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError> {
        let id = input.require("id")?;
        let timeframe = input.require_one_of("timeframe", TIMEFRAMES)?;
        let perf = input.require_one_of("perf", PERF_METRICS)?;
        let perf_chart = input.require_one_of("perfChart", PERF_CHARTS)?;

        let key = CacheKey::builder("parqet")
            .param("id", &id)
            .param("timeframe", &timeframe)
            .build();
        let body = json!({
            "portfolioIds": [id],
            "holdingIds": [],
            "assetTypes": [],
            "timeframe": timeframe,
        });
        let spec = RequestSpec::post(&self.base_url, body)
            .query("useInclude", "true")
            .query("include", "ttwror")
            .query("include", "performance_charts")
            .query("resolution", "200");

        Ok(ProxyRequest::new(key, spec, input.force())
            .option("perf", perf)
            .option("perfChart", perf_chart))
    }

    fn shape(&self, payload: Value, request: &ProxyRequest) -> Value {
        let perf = request.options.get("perf").map_or("ttwror", String::as_str);
        let perf_chart = request
            .options
            .get("perfChart")
            .map_or("perfHistory", String::as_str);

        let holdings: Vec<Value> = payload["holdings"]
            .as_array()
            .map(|holdings| {
                holdings
                    .iter()
                    .filter_map(|holding| shape_holding(holding, perf))
                    .collect()
            })
            .unwrap_or_default();

        let performance = &payload["performance"];

        // The first chart covers the whole interval and is not plotted
        let chart: Vec<Value> = payload["charts"]
            .as_array()
            .map(|charts| {
                charts
                    .iter()
                    .skip(1)
                    .map(|chart| metric(&chart["values"], perf_chart))
                    .collect()
            })
            .unwrap_or_default();

        json!({
            "holdings": holdings,
            "performance": {
                "valueStart": performance["purchaseValueForInterval"],
                "valueNow": performance["value"],
                "perf": metric(performance, perf),
            },
            "chart": chart,
        })
    }
}
