//! cloudclip - clipboard synchronization over a pub/sub relay
//!
//! This is the main entry point for the cloudclip client.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudclip::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cloudclip={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("cloudclip v{}", env!("CARGO_PKG_VERSION"));

    let handler = CliHandler::new(cli.config)?;
    handler.handle_command(cli.command).await?;

    Ok(())
}
