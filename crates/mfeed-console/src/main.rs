//! mfeed console - Entry Point
//!
//! Streams every configured topic, falls back to HTTP polling while a
//! stream is unhealthy, and serves status and metrics.

use anyhow::Result;
use clap::Parser;
use mfeed_console::config::DEFAULT_CONFIG_PATH;
use tracing::info;

/// Realtime market-feed console
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MFEED_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable stream debug logging (same as MFEED_DEBUG_WS=1)
    #[arg(long)]
    debug_ws: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config path: CLI arg > MFEED_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("MFEED_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let mut config = mfeed_console::AppConfig::load_from(&config_path)?;
    config.websocket.debug |= args.debug_ws;

    mfeed_telemetry::init_logging(config.websocket.debug)?;

    info!("Starting mfeed console v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        topics = ?config.topics,
        streaming_disabled = config.websocket.disabled,
        "Configuration loaded"
    );

    let app = mfeed_console::Application::new(config)?;
    app.run().await?;

    Ok(())
}
