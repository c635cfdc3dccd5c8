//! Calls to third-party APIs
//!
//! [`RequestSpec`] describes a call, a [`Transport`] performs one attempt and
//! [`UpstreamClient`] adds timeout, retry and backoff on top.

mod client;
mod error;
mod request;
mod retry;
mod transport;

pub use client::UpstreamClient;
pub use error::UpstreamError;
pub use request::{Method, RequestSpec};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{HttpTransport, Transport};
