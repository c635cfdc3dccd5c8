//! Per-API adapters
//!
//! An adapter is the only place that knows a particular upstream: which
//! inbound fields it needs, how they map to an upstream request and a cache
//! key, and how the raw payload is reshaped for clients. The caching layer
//! treats everything an adapter produces as opaque.

mod openweather;
mod parqet;
mod tempest;
mod timezone;
mod twelvedata;
mod visualcrossing;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, DomainExpiryFn};
use crate::error::ProxyError;
use crate::upstream::RequestSpec;

pub use openweather::OpenWeatherAdapter;
pub use parqet::ParqetAdapter;
pub use tempest::TempestAdapter;
pub use timezone::{next_transition, TimezoneAdapter};
pub use twelvedata::TwelveDataAdapter;
pub use visualcrossing::VisualCrossingAdapter;

/// The proxies this binary can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Timezone,
    OpenWeather,
    TwelveData,
    VisualCrossing,
    Tempest,
    Parqet,
}

impl ProxyKind {
    /// Every supported proxy
    pub const ALL: [ProxyKind; 6] = [
        ProxyKind::Timezone,
        ProxyKind::OpenWeather,
        ProxyKind::TwelveData,
        ProxyKind::VisualCrossing,
        ProxyKind::Tempest,
        ProxyKind::Parqet,
    ];

    /// Parses a proxy name (case-insensitive)
    pub fn from_str(s: &str) -> Option<ProxyKind> {
        let s = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.name() == s)
    }

    /// Lower-case name, also the prefix of its environment variables
    pub fn name(&self) -> &'static str {
        match self {
            ProxyKind::Timezone => "timezone",
            ProxyKind::OpenWeather => "openweather",
            ProxyKind::TwelveData => "twelvedata",
            ProxyKind::VisualCrossing => "visualcrossing",
            ProxyKind::Tempest => "tempest",
            ProxyKind::Parqet => "parqet",
        }
    }

    /// Operational defaults of this proxy's adapter
    pub fn defaults(&self) -> AdapterDefaults {
        build(*self, &AdapterSettings::default()).defaults()
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by adapters that need deployment secrets
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Directory holding default API-key files
    pub secrets_dir: PathBuf,
    /// Fallback OpenWeather `appid`
    pub openweather_default_key: Option<String>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            secrets_dir: PathBuf::from("/secrets"),
            openweather_default_key: None,
        }
    }
}

/// Creates the adapter for `kind`
pub fn build(kind: ProxyKind, settings: &AdapterSettings) -> Arc<dyn Adapter> {
    let secrets = Secrets::new(settings.secrets_dir.clone());
    match kind {
        ProxyKind::Timezone => Arc::new(TimezoneAdapter::new()),
        ProxyKind::OpenWeather => Arc::new(OpenWeatherAdapter::new(
            settings.openweather_default_key.clone(),
        )),
        ProxyKind::TwelveData => Arc::new(TwelveDataAdapter::new(secrets)),
        ProxyKind::VisualCrossing => Arc::new(VisualCrossingAdapter::new(secrets)),
        ProxyKind::Tempest => Arc::new(TempestAdapter::new()),
        ProxyKind::Parqet => Arc::new(ParqetAdapter::new()),
    }
}

/// Operational defaults an adapter ships with; environment overrides win
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterDefaults {
    pub requests_per_minute: u32,
    /// Cache lifetime in minutes, 0 disables caching
    pub cache_minutes: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for AdapterDefaults {
    fn default() -> Self {
        Self {
            requests_per_minute: 5,
            cache_minutes: 0,
            max_retries: 0,
            retry_delay_secs: 0,
        }
    }
}

/// Inbound request fields, merged from the query string, JSON body and path
#[derive(Debug, Clone, Default)]
pub struct RequestInput {
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub path: HashMap<String, String>,
}

impl RequestInput {
    /// Input made of query parameters only
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            query: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        }
    }

    /// Input made of a JSON body only
    pub fn from_body(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Default::default()
        }
    }

    /// Adds a path parameter
    pub fn with_path(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.insert(name.into(), value.into());
        self
    }

    /// Value of a field, body first then query string
    ///
    /// Empty strings and JSON `null` count as absent. Numbers and booleans in
    /// the body are rendered as text.
    pub fn field(&self, name: &str) -> Option<String> {
        let from_body = self
            .body
            .as_ref()
            .and_then(|body| body.get(name))
            .and_then(|value| match value {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            });
        from_body
            .or_else(|| self.query.get(name).cloned())
            .filter(|value| !value.is_empty())
    }

    /// A field that must be present
    pub fn require(&self, name: &str) -> Result<String, ProxyError> {
        self.field(name).ok_or_else(|| ProxyError::missing(name))
    }

    /// A field restricted to a fixed set of values
    pub fn require_one_of(&self, name: &str, allowed: &[&str]) -> Result<String, ProxyError> {
        let value = self.require(name)?;
        if allowed.contains(&value.as_str()) {
            Ok(value)
        } else {
            Err(ProxyError::not_one_of(name, &value, allowed))
        }
    }

    /// A path parameter that must be present
    pub fn path_param(&self, name: &str) -> Result<String, ProxyError> {
        self.path
            .get(name)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| ProxyError::missing(name))
    }

    /// Whether the caller asked to bypass the cache (`force` or `force_refresh`)
    pub fn force(&self) -> bool {
        ["force", "force_refresh"]
            .iter()
            .filter_map(|name| self.field(name))
            .any(|value| value.eq_ignore_ascii_case("true"))
    }
}

/// A parsed request, ready for the caching layer
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    /// Cache key built from the parameters that affect the upstream response
    pub key: CacheKey,
    pub spec: RequestSpec,
    pub force: bool,
    /// Presentation-only options consumed by [`Adapter::shape`]
    pub options: BTreeMap<String, String>,
}

impl ProxyRequest {
    pub fn new(key: CacheKey, spec: RequestSpec, force: bool) -> Self {
        Self {
            key,
            spec,
            force,
            options: BTreeMap::new(),
        }
    }

    /// Adds a shaping option
    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }
}

/// Knowledge about one upstream API
pub trait Adapter: Send + Sync + fmt::Debug {
    /// Proxy name used for logs and configuration
    fn name(&self) -> &'static str;

    /// Route the proxy is served on, in axum path syntax
    fn route(&self) -> &'static str {
        "/proxy"
    }

    /// Rate, cache and retry defaults
    fn defaults(&self) -> AdapterDefaults {
        AdapterDefaults::default()
    }

    /// Validates inbound fields and builds the upstream request and cache key
    fn parse(&self, input: &RequestInput) -> Result<ProxyRequest, ProxyError>;

    /// Turns a raw upstream payload into the public response body
    fn shape(&self, payload: Value, _request: &ProxyRequest) -> Value {
        payload
    }

    /// Payload-derived expiry rule for cached entries
    fn domain_expiry(&self) -> Option<DomainExpiryFn> {
        None
    }

    /// Request used to warm the cache for one preload item, if supported
    fn preload_request(&self, _item: &str) -> Option<ProxyRequest> {
        None
    }
}

/// Directory of deployment secrets
///
/// A caller may send the literal name of a secret (e.g.
/// `TWELVEDATA_DEFAULT_API_KEY`) instead of a key; the file of that name in
/// the secrets directory then supplies the real value.
#[derive(Debug, Clone)]
pub struct Secrets {
    dir: PathBuf,
}

impl Secrets {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Reads the secret named `placeholder` once, for use on every request
    pub fn load(&self, placeholder: &'static str) -> DefaultKey {
        let path = self.dir.join(placeholder);
        let secret = match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
            Ok(_) => Err(format!("{} secret file is empty", placeholder)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(format!("{} secret file not found", placeholder))
            }
            Err(e) => Err(format!("{} secret file unreadable: {}", placeholder, e)),
        };
        if let Err(reason) = &secret {
            debug!(path = %path.display(), reason = %reason, "Default API key unavailable");
        }
        DefaultKey {
            placeholder,
            secret,
        }
    }
}

/// A placeholder API key and the secret it stands for
#[derive(Clone)]
pub struct DefaultKey {
    placeholder: &'static str,
    secret: Result<String, String>,
}

impl fmt::Debug for DefaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultKey")
            .field("placeholder", &self.placeholder)
            .field("loaded", &self.secret.is_ok())
            .finish()
    }
}

impl DefaultKey {
    /// Returns `value`, or the loaded secret when `value` is the placeholder
    ///
    /// # Returns
    /// * `Ok(key)` to send upstream
    /// * `Err(ProxyError::Configuration)` if the placeholder was sent but its
    ///   secret file was missing, empty or unreadable at startup
    pub fn resolve(&self, value: String) -> Result<String, ProxyError> {
        if value != self.placeholder {
            return Ok(value);
        }
        self.secret
            .clone()
            .map_err(ProxyError::Configuration)
    }
}
