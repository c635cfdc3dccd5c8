//! Description of a single upstream call

use std::fmt;

use serde_json::Value;

/// Query parameters whose values are never written to logs
const REDACTED_PARAMS: &[&str] = &["appid", "apikey", "api_key", "key", "token"];

/// HTTP method of an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Everything needed to issue one upstream request
///
/// Built by an adapter from the inbound parameters. Query pairs keep their
/// order so the URL sent upstream is stable.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestSpec {
    /// A GET request without parameters
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// A POST request carrying a JSON body
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Appends a query parameter
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Value of the first query parameter called `name`
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Log-safe rendering: credentials are replaced by `***`
impl fmt::Display for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        for (i, (name, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            let shown = if REDACTED_PARAMS.contains(&name.to_ascii_lowercase().as_str()) {
                "***"
            } else {
                value.as_str()
            };
            write!(f, "{}{}={}", sep, name, shown)?;
        }
        Ok(())
    }
}
