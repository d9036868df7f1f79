use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lancast::config::Config;
use lancast::network::{Registry, Scanner};
use lancast::server::HttpServer;
use lancast::session::SessionManager;
use lancast::DeviceKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the media/relay server (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a config file (defaults to the per-user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between background discovery passes
    #[arg(long)]
    scan_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting lancast v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(interval) = args.scan_interval {
        config.discovery.scan_interval_secs = interval;
    }

    let registry = Registry::new();
    let scanner = Arc::new(Scanner::new(Arc::clone(&registry), config.clone()));
    let manager = SessionManager::new(config.clone());

    // Discovery runs in the background for the life of the process.
    tokio::spawn(Arc::clone(&scanner).run(vec![
        DeviceKind::CastReceiver,
        DeviceKind::RokuReceiver,
    ]));

    let server = HttpServer::new(registry, scanner, manager, &config);
    server.run().await?;

    Ok(())
}
