//! orbs-proxy library
//!
//! Resilient caching layer (rate limiter, cache store, upstream client and
//! the orchestrator tying them together) and the thin per-API adapters served
//! on top of it. The modules are public for the binary and integration tests.

pub mod adapters;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod proxy;
pub mod refresh;
pub mod server;
pub mod upstream;
