//! Shared logging setup for the API and worker binaries.
//!
//! Unlike a desktop/CLI tool with a rotating on-disk log, these are long-running
//! services expected to run under a process supervisor that captures stderr, so
//! logging here is stderr-only, `EnvFilter`-driven, structured text.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "cf_api=info,cf_worker=info,cf_orchestrator=info,cf_queue=info,cf_cache=info";

/// Logging configuration shared by the `cf-api-server` and `cf-worker` binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize a stderr `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(app = config.app_name, "logging initialized");
    Ok(())
}
