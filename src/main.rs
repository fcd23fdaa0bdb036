#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod bridge;
mod cli;
mod config;
mod discord;
mod irc;
mod mentions;
mod model;
mod ratelimit;
mod relay;
mod stats;
mod supervisor;
mod utils;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let config = Config::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    if args.check {
        println!(
            "configuration OK: {} channel pair(s), irc {}:{}",
            config.channels.len(),
            config.irc.server,
            config.irc.port
        );
        return Ok(());
    }

    utils::logging::init_tracing(&config.logging)?;
    info!(
        channels = config.channels.len(),
        irc_server = %config.irc.server,
        "discord-irc relay starting up"
    );

    let bridge = bridge::Bridge::new(&config)?;
    bridge.run().await?;

    info!("discord-irc relay shutting down");
    Ok(())
}
