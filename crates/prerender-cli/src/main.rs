//! Prerender gateway CLI
//!
//! Usage:
//!   prerender                 Serve using environment configuration
//!   prerender --port 9000     Override the listen port
//!   prerender --verbose       Debug-level logging
//!
//! Environment: PORT, CHROME_PATH, RENDER_TIMEOUT / PAGE_LOAD_TIMEOUT,
//! CACHE (redis | s3 | memory | empty), REDIS_URL, PLUGIN_STATUS_CODE,
//! PLUGIN_SCRIPT_TAGS.

use anyhow::Result;
use clap::Parser;
use prerender_core::GatewayConfig;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "prerender")]
#[command(author, version, about = "Prerender gateway: serve script-driven pages as static HTML")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Listen port; overrides PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the Chrome/Chromium binary; overrides CHROME_PATH
    #[arg(long, value_name = "PATH")]
    chrome: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = GatewayConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(chrome) = cli.chrome {
        config.chrome_path = Some(chrome);
    }

    info!("starting prerender gateway on port {}", config.port);
    prerender_gateway::run(config).await
}
