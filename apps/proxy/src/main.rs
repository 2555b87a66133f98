//! maxage proxy - entry point
//!
//! Starts the transparent gRPC proxy that annotates responses with
//! `cache-control`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use maxage_core::{config::Config, server};

const DEFAULT_FILTER: &str = "maxage_core=debug,info";

/// Transparent gRPC proxy that tells downstream caches how long a response
/// stays valid.
///
/// Settings are read from the config file and `PROXY_*` environment
/// variables, e.g. `PROXY_UPSTREAM_HOST`, `PROXY_MAX_AGE=dynamic`.
#[derive(Parser, Debug)]
#[command(name = "maxage-proxy", author, version, about)]
struct Args {
    /// Configuration file (defaults to ./maxage.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "maxage_core=trace,info" (overrides RUST_LOG)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(log_level: Option<&str>, format: LogFormat) -> anyhow::Result<()> {
    let filter = match log_level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {directives:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref(), args.log_format)?;

    let config = Config::load_from(args.config.as_deref())
        .inspect_err(|e| error!(error = %e, "Failed to load configuration"))
        .context("failed to load configuration")?;
    info!(
        address = %config.server.address,
        upstream = %config.server.upstream,
        "Configuration loaded"
    );

    server::run(&config)
        .await
        .inspect_err(|e| error!(error = %e, "Server error"))
        .context("proxy server stopped")
}
