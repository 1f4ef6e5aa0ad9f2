use anyhow::{Context, Result};
use clap::Parser;
use icegate_config::GatewayConfig;
use std::path::PathBuf;

/// S3-compatible gateway serving virtual buckets from log-structured tables
#[derive(Parser)]
#[command(name = "icegate")]
#[command(version)]
#[command(about = "S3-compatible gateway serving virtual buckets from log-structured tables", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GatewayConfig::load().context("Failed to load configuration")?,
    };

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(level) = cli.log_level {
        config.server.log_level = level;
    }

    icegate_server::init_tracing(&config);
    icegate_server::run_with_config(config).await
}
