//! Roomlink - share and join game lobbies with room codes
//!
//! `roomlink host` starts a lobby and prints its room code; `roomlink join`
//! turns a room code back into a connection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use roomlink_core::{room_code, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod args;
mod host;
mod join;

use args::{Args, Command};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "roomlink={0},roomlink_net={0},roomlink_core={0}",
            default_level
        ))
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    match path {
        // An explicit path must exist
        Some(path) => Settings::load(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => {
            let path = Settings::default_path()?;
            Settings::load_or_default(&path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    tracing::info!("Starting roomlink {}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings(args.config)?;

    match args.command {
        Command::Host {
            port,
            public_address,
            name,
            copy,
        } => {
            host::run(
                &settings,
                host::HostOptions {
                    port,
                    public_address,
                    name,
                    copy,
                },
            )
            .await
        }
        Command::Join { code, player_name } => join::run(&settings, code, player_name).await,
        Command::Encode { address, port } => {
            if address.is_empty() || address.contains(':') {
                anyhow::bail!("Address must be non-empty and must not contain ':'");
            }
            println!("{}", room_code::encode(&address, port));
            Ok(())
        }
        Command::Decode { code } => {
            let address = room_code::decode(code.trim())
                .with_context(|| format!("Invalid room code '{}'", code.trim()))?;
            println!("{}", address);
            Ok(())
        }
    }
}
