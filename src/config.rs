//! Environment-style configuration for one proxy
//!
//! Every setting is read from `NAME_*` variables, where `NAME` is the
//! upper-case proxy name (e.g. `TIMEZONE_PROXY_CACHE_LIFE`). Unset variables
//! fall back to the adapter's defaults; malformed ones are errors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::adapters::{AdapterDefaults, AdapterSettings, ProxyKind};
use crate::cache::FileBackend;
use crate::limiter::RateLimiterConfig;
use crate::upstream::{Backoff, RetryPolicy};

/// Default spacing between preload requests
const DEFAULT_PRELOAD_DELAY_SECS: u64 = 32;

/// Default upstream timeout
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Errors raised while reading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to something unusable
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: String,
        value: String,
        expected: &'static str,
    },

    /// The file backend was selected but no location could be determined
    #[error("No default cache directory available; set {0}")]
    NoCachePath(String),
}

/// Where cache entries are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    File(PathBuf),
}

/// Cache warm-up settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadConfig {
    /// Items to fetch at startup (e.g. timezone names)
    pub items: Vec<String>,
    /// Pause between items
    pub delay: Duration,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            delay: Duration::from_secs(DEFAULT_PRELOAD_DELAY_SECS),
        }
    }
}

/// Complete configuration of one proxy process
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub rate_limit: RateLimiterConfig,
    /// Cache time-to-live, zero disables caching
    pub cache_ttl: Duration,
    pub cache_backend: CacheBackendKind,
    pub retry: RetryPolicy,
    /// Per-attempt upstream timeout
    pub timeout: Duration,
    pub preload: PreloadConfig,
    pub adapter: AdapterSettings,
}

impl ProxyConfig {
    /// Reads configuration from the process environment
    pub fn from_env(kind: ProxyKind, defaults: AdapterDefaults) -> Result<Self, ConfigError> {
        Self::from_lookup(kind, defaults, |name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, which returns a variable's value if set
    pub fn from_lookup<F>(
        kind: ProxyKind,
        defaults: AdapterDefaults,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env {
            prefix: kind.name().to_ascii_uppercase(),
            lookup,
        };

        let requests = env.parse_or("PROXY_REQUESTS_PER_MINUTE", defaults.requests_per_minute)?;
        let window_secs: u64 = env.parse_or("PROXY_RATE_WINDOW", 60)?;
        if window_secs == 0 {
            return Err(env.invalid("PROXY_RATE_WINDOW", "0", "a positive number of seconds"));
        }

        let cache_minutes: u64 = env.parse_or("PROXY_CACHE_LIFE", defaults.cache_minutes)?;
        let cache_ttl = Duration::from_secs(cache_minutes.saturating_mul(60));

        let cache_backend = match (env.get("PROXY_CACHE_PATH"), env.get("PROXY_CACHE_BACKEND")) {
            (Some(path), _) => CacheBackendKind::File(PathBuf::from(path)),
            (None, None) => CacheBackendKind::Memory,
            (None, Some(backend)) => match backend.to_ascii_lowercase().as_str() {
                "memory" => CacheBackendKind::Memory,
                "file" => FileBackend::default_path(kind.name())
                    .map(CacheBackendKind::File)
                    .ok_or_else(|| ConfigError::NoCachePath(env.var_name("PROXY_CACHE_PATH")))?,
                _ => {
                    return Err(env.invalid("PROXY_CACHE_BACKEND", &backend, "'memory' or 'file'"))
                }
            },
        };

        let retries: u32 = env.parse_or("MAX_RETRIES", defaults.max_retries)?;
        let retry_delay: u64 = env.parse_or("RETRY_DELAY", defaults.retry_delay_secs)?;
        let backoff = match env.get("RETRY_BACKOFF").as_deref() {
            None | Some("fixed") => Backoff::Fixed,
            Some("exponential") => Backoff::Exponential,
            Some(other) => {
                return Err(env.invalid("RETRY_BACKOFF", other, "'fixed' or 'exponential'"))
            }
        };
        let retry = RetryPolicy::new(retries, Duration::from_secs(retry_delay)).with_backoff(backoff);

        let timeout_secs: u64 = env.parse_or("PROXY_TIMEOUT", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(env.invalid("PROXY_TIMEOUT", "0", "a positive number of seconds"));
        }

        let items = env
            .get("PRELOAD")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let preload_delay: u64 = env.parse_or("PRELOAD_DELAY", DEFAULT_PRELOAD_DELAY_SECS)?;

        let adapter = AdapterSettings {
            secrets_dir: (env.lookup)("PROXY_SECRETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| AdapterSettings::default().secrets_dir),
            openweather_default_key: (env.lookup)("OPENWEATHER_DEFAULT_API_KEY"),
        };

        Ok(Self {
            kind,
            rate_limit: RateLimiterConfig {
                requests_per_window: requests,
                window: Duration::from_secs(window_secs),
            },
            cache_ttl,
            cache_backend,
            retry,
            timeout: Duration::from_secs(timeout_secs),
            preload: PreloadConfig {
                items,
                delay: Duration::from_secs(preload_delay),
            },
            adapter,
        })
    }

    /// Logs the effective configuration at startup
    pub fn log_summary(&self) {
        let cache = if self.cache_ttl.is_zero() {
            "disabled".to_string()
        } else {
            format!("{} minutes", self.cache_ttl.as_secs() / 60)
        };
        let backend = match &self.cache_backend {
            CacheBackendKind::Memory => "memory".to_string(),
            CacheBackendKind::File(path) => path.display().to_string(),
        };
        info!(
            proxy = %self.kind,
            rate_limit = %self.rate_limit.describe(),
            cache = %cache,
            cache_backend = %backend,
            max_attempts = self.retry.attempts(),
            retry_delay_secs = self.retry.base_delay.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            preload_items = self.preload.items.len(),
            "Proxy configuration"
        );
    }
}

/// Prefixed variable lookup
struct Env<F> {
    prefix: String,
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn var_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    fn get(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&self.var_name(suffix))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse_or<T: FromStr>(&self, suffix: &str, default: T) -> Result<T, ConfigError> {
        match self.get(suffix) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| self.invalid(suffix, &raw, "a non-negative integer")),
        }
    }

    fn invalid(&self, suffix: &str, value: &str, expected: &'static str) -> ConfigError {
        ConfigError::Invalid {
            name: self.var_name(suffix),
            value: value.to_string(),
            expected,
        }
    }
}
