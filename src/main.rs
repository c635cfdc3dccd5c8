//! orbs-proxy - caching, rate-limited JSON proxies for third-party data APIs
//!
//! Serves one proxy per process. The proxy, bind address and log output come
//! from the command line; limits, cache and retry settings from the
//! environment.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use orbs_proxy::app::App;
use orbs_proxy::cli::{Cli, StartupConfig};
use orbs_proxy::config::ProxyConfig;
use orbs_proxy::logging::init_logging;
use orbs_proxy::server;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let startup = match StartupConfig::from_cli(&cli) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(&startup.logging) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(startup).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Proxy stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(startup: StartupConfig) -> Result<(), Box<dyn Error>> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        proxy = %startup.proxy,
        "Starting orbs-proxy"
    );

    let config = ProxyConfig::from_env(startup.proxy, startup.proxy.defaults())?;
    config.log_summary();

    let app = App::from_config(&config)?;
    app.init();

    let listener = server::bind(startup.bind).await?;
    let warmup = app.warm_up();

    let result = server::serve(app.clone(), listener).await;

    if let Some(handle) = warmup {
        handle.shutdown().await;
    }
    app.shutdown();

    result?;
    Ok(())
}
