use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tapwire_capture::{interface_addresses, PacketSource};
use tapwire_config::TapwireConfig;
use tapwire_engine::{CaptureRuntime, EngineContext};
use tracing::{info, warn};

use crate::sinks::{open_output, JsonLinesEntrySink, JsonLinesLinkSink};

#[derive(Parser)]
#[command(version, about = "Passive HTTP traffic capture")]
pub struct Cli {
    /// Configuration file; defaults to config/tapwire.yaml plus environment.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture live traffic on an interface
    Run(RunArgs),
    /// Feed a pcap file through the engine
    Replay(ReplayArgs),
    /// Validate the configuration and exit
    CheckConfig,
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Entries file (JSON lines); stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Outbound links file (JSON lines); stdout when omitted
    #[arg(long)]
    pub links: Option<PathBuf>,

    /// Write entry summaries instead of full entries
    #[arg(long)]
    pub summary: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Overrides `capture.interface`
    #[arg(short, long)]
    pub interface: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Capture file to read
    pub file: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<TapwireConfig> {
    let config = match path {
        Some(path) => TapwireConfig::load_from_path(path),
        None => TapwireConfig::load(),
    };
    config.context("loading configuration")
}

pub async fn run_live(mut config: TapwireConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(interface) = args.interface {
        config.capture.interface = interface;
    }
    if config.filter.own_addresses.is_empty() {
        config.filter.own_addresses = interface_addresses(&config.capture.interface)
            .context("discovering interface addresses")?;
        info!(
            addresses = ?config.filter.own_addresses,
            "Using interface addresses as own addresses"
        );
    }

    let source = PacketSource::open_live(&config.capture)
        .with_context(|| format!("opening interface {}", config.capture.interface))?;
    run_source(&config, source, &args.output).await
}

pub async fn run_replay(config: TapwireConfig, args: ReplayArgs) -> anyhow::Result<()> {
    let source = PacketSource::open_file(&args.file, config.capture.bpf_filter.as_deref())
        .with_context(|| format!("opening {}", args.file.display()))?;
    run_source(&config, source, &args.output).await
}

async fn run_source(
    config: &TapwireConfig,
    source: PacketSource,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let entries = Arc::new(JsonLinesEntrySink::new(
        open_output(output.output.as_deref()).context("opening entries output")?,
        output.summary,
    ));
    let links = Arc::new(JsonLinesLinkSink::new(
        open_output(output.links.as_deref()).context("opening links output")?,
    ));
    let context = Arc::new(EngineContext::from_config(config, entries, links)?);
    let runtime = CaptureRuntime::new(Arc::clone(&context), config.assembly.clone());

    let terminate = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let terminate = Arc::clone(&terminate);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping capture");
                terminate.store(true, Ordering::Relaxed);
            }
        }
    });

    let summary = runtime.run(source, terminate).await?;
    info!(
        packets = summary.source.packets,
        undecodable = summary.source.undecodable,
        connections = summary.assembly.connections,
        entries = context.metrics.entries.get(),
        "Capture finished"
    );

    if config.telemetry.metrics {
        match context.metrics.gather_metrics() {
            Ok(text) => eprint!("{text}"),
            Err(e) => warn!(error = %e, "failed to render metrics"),
        }
    }
    Ok(())
}

pub fn check_config(config: &TapwireConfig) -> anyhow::Result<()> {
    config.filter.to_settings()?;
    config.engine.masker()?;
    info!(
        mode = ?config.filter.mode,
        direction = ?config.filter.direction,
        interface = %config.capture.interface,
        "Configuration is valid"
    );
    Ok(())
}
