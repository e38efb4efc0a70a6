//! Signer bridge CLI
//!
//! Host-side harness for the bridge: inspect configuration and drive the
//! storage relay against the file-backed credential store.

use clap::{Parser, Subcommand};
use embedded_signer_bridge::channel::{StorageEnvelope, StorageRequest};
use embedded_signer_bridge::storage::{FileCredentialStore, StorageRelay};
use embedded_signer_bridge::{BridgeConfig, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "signer-bridge")]
#[command(about = "Session bridge for a sandboxed embedded-wallet signer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config,

    /// Run one storage operation through the relay
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// Answer storage envelopes read line by line from stdin
    Relay,
}

#[derive(Subcommand)]
enum StorageAction {
    /// Read a key
    Get { key: String },

    /// Write a key
    Set { key: String, value: String },

    /// Delete a key
    Remove { key: String },

    /// Delete every per-origin key (defaults to the configured origin)
    Flush {
        #[arg(long)]
        origin: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // Logs go to stderr so `relay` output stays machine-readable.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match cli.config {
        Some(path) => BridgeConfig::from_file(&path)?,
        None => BridgeConfig::default(),
    }
    .with_env_overrides()?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Storage { action } => {
            run_storage(&config, action).await?;
        }
        Commands::Relay => {
            run_relay(&config).await?;
        }
    }

    Ok(())
}

async fn open_relay(config: &BridgeConfig) -> Result<StorageRelay> {
    let path = config
        .storage
        .store_path
        .clone()
        .unwrap_or_else(|| "credentials.json".to_string());
    let store = FileCredentialStore::open(&path).await?;
    Ok(StorageRelay::new(Arc::new(store)))
}

async fn run_storage(config: &BridgeConfig, action: StorageAction) -> Result<()> {
    let relay = open_relay(config).await?;

    let request = match action {
        StorageAction::Get { key } => StorageRequest::Get { key },
        StorageAction::Set { key, value } => StorageRequest::Set { key, value },
        StorageAction::Remove { key } => StorageRequest::Remove { key },
        StorageAction::Flush { origin } => StorageRequest::Flush {
            origin: origin.unwrap_or_else(|| config.storage.origin.clone()),
        },
    };

    let event = request.event();
    let response = relay.handle(request).await;
    tracing::info!(event = %event, "Storage operation finished");
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_relay(config: &BridgeConfig) -> Result<()> {
    let relay = open_relay(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("Relaying storage envelopes from stdin");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: StorageEnvelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed envelope");
                continue;
            }
        };

        // Unknown storage events end the loop: the peer speaks another protocol.
        let response = relay.handle_envelope(envelope)?.await;
        println!("{}", serde_json::to_string(&response)?);
    }

    tracing::info!(pending = relay.pending_writes(), "Input closed");
    Ok(())
}
