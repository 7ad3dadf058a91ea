//! ## tapwire
//! Passive HTTP capture: live interface capture, pcap replay and
//! configuration checks.

use clap::Parser;
use tapwire_telemetry::{EventLogger, LogFormat};

mod commands;
mod sinks;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    EventLogger::init(
        &config.telemetry.log_level,
        LogFormat::from_name(&config.telemetry.log_format),
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Run(args) => commands::run_live(config, args).await,
        Commands::Replay(args) => commands::run_replay(config, args).await,
        Commands::CheckConfig => commands::check_config(&config),
    }
}
