//! ifm-proxy server binary.

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ifm_proxy::{start_proxy_server, Config, ProxyState};

/// Embedded-content proxy rewriting HTML and CSS for HTTPS pages.
#[derive(Parser, Debug)]
#[command(name = "ifm-proxy-server")]
#[command(about = "Mixed-content proxy for embedded pages", long_about = None)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    /// Listen port, overrides PROXY_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = Some(port);
    }

    let state = ProxyState::new(&config)?;
    start_proxy_server(&config, state).await
}
