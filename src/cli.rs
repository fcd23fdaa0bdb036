use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "discord-irc-relay",
    version,
    about = "Relays messages between Discord channels and IRC channels"
)]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub check: bool,
}
