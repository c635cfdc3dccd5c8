//! Command-line interface parsing for orbs-proxy
//!
//! The binary serves exactly one proxy per process. Which one, where it
//! listens and how it logs come from the command line; everything else is
//! read from the environment (see [`crate::config`]).

use std::net::SocketAddr;

use clap::Parser;
use thiserror::Error;

use crate::adapters::ProxyKind;
use crate::logging::{LogFormat, LoggingConfig};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified proxy name is not recognized
    #[error(
        "Invalid proxy: '{0}'. Valid proxies: timezone, openweather, twelvedata, visualcrossing, tempest, parqet"
    )]
    InvalidProxy(String),

    /// The log format is not one of json, pretty, compact
    #[error("Invalid log format: '{0}'. Valid formats: json, pretty, compact")]
    InvalidLogFormat(String),

    /// The bind address does not parse as host:port
    #[error("Invalid bind address: '{0}'. Expected an address like 0.0.0.0:8080")]
    InvalidBind(String),
}

/// orbs-proxy - caching, rate-limited JSON proxies for third-party data APIs
#[derive(Parser, Debug)]
#[command(name = "orbs-proxy")]
#[command(about = "Caching, rate-limited JSON proxies for third-party data APIs")]
#[command(version)]
pub struct Cli {
    /// Proxy to serve
    ///
    /// Examples:
    ///   orbs-proxy --proxy timezone
    ///   orbs-proxy --proxy twelvedata --bind 127.0.0.1:9000
    ///
    /// Valid proxies: timezone, openweather, twelvedata, visualcrossing, tempest, parqet
    #[arg(long, value_name = "PROXY")]
    pub proxy: String,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Log level or filter directives; RUST_LOG takes precedence
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: json, pretty or compact
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub proxy: ProxyKind,
    pub bind: SocketAddr,
    pub logging: LoggingConfig,
}

/// Parses a proxy name argument into a ProxyKind.
///
/// # Arguments
/// * `s` - The proxy name from CLI
///
/// # Returns
/// * `Ok(ProxyKind)` if the name matches a supported proxy
/// * `Err(CliError::InvalidProxy)` if it doesn't
pub fn parse_proxy_arg(s: &str) -> Result<ProxyKind, CliError> {
    ProxyKind::from_str(s).ok_or_else(|| CliError::InvalidProxy(s.to_string()))
}

/// Parses a log format argument.
pub fn parse_log_format_arg(s: &str) -> Result<LogFormat, CliError> {
    LogFormat::from_str(s).ok_or_else(|| CliError::InvalidLogFormat(s.to_string()))
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with validated settings
    /// * `Err(CliError)` for the first invalid argument
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let proxy = parse_proxy_arg(&cli.proxy)?;
        let bind = cli
            .bind
            .parse::<SocketAddr>()
            .map_err(|_| CliError::InvalidBind(cli.bind.clone()))?;
        let format = parse_log_format_arg(&cli.log_format)?;

        Ok(StartupConfig {
            proxy,
            bind,
            logging: LoggingConfig::new()
                .with_level(cli.log_level.clone())
                .with_format(format),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_arg_every_proxy() {
        for kind in ProxyKind::ALL {
            assert_eq!(parse_proxy_arg(kind.name()).unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_proxy_arg_case_insensitive() {
        assert_eq!(parse_proxy_arg("TwelveData").unwrap(), ProxyKind::TwelveData);
    }

    #[test]
    fn test_parse_proxy_arg_invalid() {
        let result = parse_proxy_arg("mlb");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Invalid proxy"));
        assert!(err.to_string().contains("mlb"));
    }

    #[test]
    fn test_parse_log_format_arg_invalid() {
        let err = parse_log_format_arg("xml").unwrap_err();
        assert!(err.to_string().contains("Invalid log format"));
    }

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["orbs-proxy", "--proxy", "timezone"]);
        assert_eq!(cli.proxy, "timezone");
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.log_format, "pretty");
    }

    #[test]
    fn test_cli_requires_proxy() {
        assert!(Cli::try_parse_from(["orbs-proxy"]).is_err());
    }

    #[test]
    fn test_startup_config_from_cli() {
        let cli = Cli::parse_from([
            "orbs-proxy",
            "--proxy",
            "parqet",
            "--bind",
            "127.0.0.1:9000",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.proxy, ProxyKind::Parqet);
        assert_eq!(config.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_startup_config_from_cli_invalid_bind() {
        let cli = Cli::parse_from(["orbs-proxy", "--proxy", "timezone", "--bind", "nowhere"]);
        let result = StartupConfig::from_cli(&cli);
        assert!(matches!(result, Err(CliError::InvalidBind(_))));
    }

    #[test]
    fn test_startup_config_from_cli_invalid_proxy() {
        let cli = Cli::parse_from(["orbs-proxy", "--proxy", "invalid"]);
        let result = StartupConfig::from_cli(&cli);
        assert!(matches!(result, Err(CliError::InvalidProxy(_))));
    }
}
