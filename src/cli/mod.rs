use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::clipboard::ArboardClipboard;
use crate::config::Config;
use crate::hotkey::HotkeyListener;
use crate::sync::{PublishOutcome, Publisher, SyncEngine};

#[derive(Parser)]
#[command(name = "cloudclip")]
#[command(about = "Clipboard synchronization over a publish/subscribe relay")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Sync the clipboard until interrupted (default)")]
    Run,

    #[command(about = "Publish text, or the current clipboard, once")]
    Publish { text: Option<String> },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Write an example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

pub struct CliHandler {
    config_path: Option<PathBuf>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self { config_path })
    }

    fn load_config(&self) -> Result<Arc<Config>> {
        let config = Config::load_or_init(self.config_path.as_deref())
            .context("Failed to load configuration")?;
        Ok(Arc::new(config))
    }

    pub async fn handle_command(&self, command: Option<Commands>) -> Result<()> {
        match command.unwrap_or(Commands::Run) {
            Commands::Run => self.run().await,
            Commands::Publish { text } => self.publish(text).await,
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    async fn run(&self) -> Result<()> {
        let config = Config::load_or_init(self.config_path.as_deref())
            .context("Failed to load configuration")?;
        let (engine, listener, hotkeys) = start_sync(config)?;

        let stats = engine.run(hotkeys, shutdown_signal()).await;
        // unregisters the hotkey
        drop(listener);

        info!(
            "Stopped: {} connection attempts, {} clips received",
            stats.connect_attempts, stats.applied
        );
        Ok(())
    }

    async fn publish(&self, text: Option<String>) -> Result<()> {
        let config = self.load_config()?;
        let publisher = Publisher::new(&config)?;

        let outcome = match text {
            Some(text) => publisher.publish_text(&text).await?,
            None => {
                let clipboard = ArboardClipboard::new()?;
                publisher.publish_from(&clipboard).await?
            }
        };

        match outcome {
            PublishOutcome::Skipped => println!("Nothing to publish"),
            PublishOutcome::Published(_) => println!("Published to {}", publisher.url()),
        }
        Ok(())
    }

    fn handle_config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let config = self.load_config()?;
                println!("{}", config.to_toml()?);
            }
            ConfigAction::Init { force } => {
                let path = match &self.config_path {
                    Some(path) => path.clone(),
                    None => Config::default_path()?,
                };
                if path.exists() && !force {
                    anyhow::bail!(
                        "Config file {} already exists. Use --force to overwrite.",
                        path.display()
                    );
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, Config::generate_example()?)?;
                println!("Wrote example configuration to {}", path.display());
            }
            ConfigAction::Validate => {
                let path = match &self.config_path {
                    Some(path) => path.clone(),
                    None => Config::default_path()?,
                };
                match Config::load_from_path(&path) {
                    Ok(_) => println!("Configuration is valid"),
                    Err(e) => {
                        error!("Invalid configuration: {}", e);
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Build the engine on the system clipboard and register the publish hotkey
fn start_sync(
    config: Config,
) -> crate::Result<(SyncEngine, HotkeyListener, mpsc::Receiver<()>)> {
    let (listener, hotkeys) = HotkeyListener::spawn(&config.hotkeys)?;
    let engine = SyncEngine::from_config(config)?;
    Ok((engine, listener, hotkeys))
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
