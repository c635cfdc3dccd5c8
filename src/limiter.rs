//! Per-client request rate limiting
//!
//! Fixed-window counters aligned to the wall clock: with a one-minute window
//! every client's budget resets at the top of each minute. The admission rule
//! itself is the pure function [`decide`], so it can be exercised without a
//! real clock; [`RateLimiter`] only adds the shared per-client state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Client states kept before old windows are swept
const PRUNE_THRESHOLD: usize = 10_000;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per client per window. Zero disables limiting.
    pub requests_per_window: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimiterConfig {
    /// Limit of `requests` per wall-clock minute
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests_per_window: requests,
            window: Duration::from_secs(60),
        }
    }

    /// Human-readable limit, e.g. `5/minute`
    pub fn describe(&self) -> String {
        match self.window_secs() {
            1 => format!("{}/second", self.requests_per_window),
            60 => format!("{}/minute", self.requests_per_window),
            3600 => format!("{}/hour", self.requests_per_window),
            secs => format!("{} per {} seconds", self.requests_per_window, secs),
        }
    }

    fn window_secs(&self) -> i64 {
        i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX).max(1)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_minute(5)
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    /// The client has used up its budget for this window
    Denied {
        /// Time until the window resets
        retry_after: Duration,
        /// Effective limit, e.g. `5/minute`
        limit: String,
    },
}

impl Admission {
    /// Whether the request was admitted
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Counter for one client in one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Unix timestamp (seconds) at which the window started
    pub window_start: i64,
    /// Requests admitted in that window
    pub count: u32,
}

/// Decides admission for one request
///
/// # Arguments
/// * `state` - The client's previous counter, if any
/// * `now` - Current wall-clock time
/// * `config` - Limit and window
///
/// # Returns
/// The counter to store for the client and the admission outcome
pub fn decide(
    state: Option<WindowState>,
    now: DateTime<Utc>,
    config: &RateLimiterConfig,
) -> (WindowState, Admission) {
    let window_secs = config.window_secs();
    let window_start = now.timestamp().div_euclid(window_secs) * window_secs;

    let current = match state {
        Some(state) if state.window_start == window_start => state,
        _ => WindowState {
            window_start,
            count: 0,
        },
    };

    if config.requests_per_window == 0 {
        return (
            current,
            Admission::Allowed {
                remaining: u32::MAX,
            },
        );
    }

    if current.count < config.requests_per_window {
        let next = WindowState {
            window_start,
            count: current.count + 1,
        };
        let remaining = config.requests_per_window - next.count;
        return (next, Admission::Allowed { remaining });
    }

    let window_end_ms = window_start.saturating_add(window_secs).saturating_mul(1000);
    let wait_ms = window_end_ms.saturating_sub(now.timestamp_millis()).max(0);
    // Round up so a client retrying after the hint lands in the next window
    let retry_secs = (wait_ms.saturating_add(999) / 1000).max(1);

    (
        current,
        Admission::Denied {
            retry_after: Duration::from_secs(retry_secs as u64),
            limit: config.describe(),
        },
    )
}

/// Rate limiter keyed by client identity (typically the remote address)
///
/// State is in-memory only; a restart resets every client.
#[derive(Debug)]
pub struct RateLimiter {
    /// Identifier used in logs
    id: String,
    config: RateLimiterConfig,
    clients: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    /// Creates a limiter
    pub fn new(id: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            id: id.into(),
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The limiter configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Checks and records a request from `client_id` at the current time
    pub fn admit(&self, client_id: &str) -> Admission {
        self.admit_at(client_id, Utc::now())
    }

    /// Checks and records a request from `client_id` at `now`
    pub fn admit_at(&self, client_id: &str, now: DateTime<Utc>) -> Admission {
        let mut clients = self.clients.lock();

        if clients.len() >= PRUNE_THRESHOLD && !clients.contains_key(client_id) {
            let window_secs = self.config.window_secs();
            let current_start = now.timestamp().div_euclid(window_secs) * window_secs;
            clients.retain(|_, state| state.window_start == current_start);
        }

        let (next, admission) = decide(clients.get(client_id).copied(), now, &self.config);
        clients.insert(client_id.to_string(), next);
        drop(clients);

        match &admission {
            Admission::Allowed { remaining } => {
                debug!(limiter = %self.id, client = %client_id, remaining, "Request admitted");
            }
            Admission::Denied { retry_after, limit } => {
                warn!(
                    limiter = %self.id,
                    client = %client_id,
                    limit = %limit,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
            }
        }
        admission
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}
