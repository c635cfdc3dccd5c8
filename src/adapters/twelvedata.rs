//! Twelve Data stock quote adapter

use super::{Adapter, AdapterDefaults, DefaultKey, ProxyRequest, RequestInput, Secrets};
use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

const QUOTE_URL: &str = "https://api.twelvedata.com/quote";

/// Placeholder callers send to use the deployment's own key
const DEFAULT_KEY_PLACEHOLDER: &str = "TWELVEDATA_DEFAULT_API_KEY";

/// Adapter for the Twelve Data `/quote` endpoint
#[derive(Debug, Clone)]
pub struct TwelveDataAdapter {
    base_url: String,
    default_key: DefaultKey,
}

impl TwelveDataAdapter {
    pub fn new(secrets: Secrets) -> Self {
        Self {
            base_url: QUOTE_URL.to_string(),
            default_key: secrets.load(DEFAULT_KEY_PLACEHOLDER),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Adapter for TwelveDataAdapter {
    fn name(&self) -> &'static str {
        "twelvedata"
    }

    fn route(&self) -> &'static str {
        "/quote"
    }

    fn defaults(&self) -> AdapterDefaults {
        AdapterDefaults {
            cache_minutes: 5,
            ..AdapterDefaults::default()
        }
    }

    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError> {
        let symbol = input.require("symbol")?;
        let apikey = input
            .field("apikey")
            .ok_or_else(|| ProxyError::MissingParameter("API key is required".to_string()))?;
        let apikey = self.default_key.resolve(apikey)?;

        let key = CacheKey::builder("twelvedata")
            .param("symbol", &symbol)
            .credential("apikey", &apikey)
            .build();
        let spec = RequestSpec::get(&self.base_url)
            .query("symbol", symbol)
            .query("apikey", apikey);

        Ok(ProxyRequest::new(key, spec, input.force()))
    }
}
