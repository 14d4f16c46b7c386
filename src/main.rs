use clap::Parser;
use std::path::PathBuf;

use chronos_backend::config::Config;
use chronos_backend::gateway;

/// Backend for the Chronos life-stats app.
#[derive(Parser)]
#[command(name = "chronos-backend", version, about)]
struct Cli {
    /// Path to the TOML config file. Falls back to the CHRONOS_CONFIG env
    /// var, then chronos.toml in the working directory, then defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.http.host = host;
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }

    init_tracing(&config.logging.level);
    gateway::serve(config).await
}
