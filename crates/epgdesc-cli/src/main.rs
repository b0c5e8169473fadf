use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use epgdesc_sync::{report_snapshot, FeedOutcome, RunSummary, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "epgdesc")]
#[command(about = "Collect and reconcile program descriptions from EPG feeds")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Args, Default)]
struct RunArgs {
    /// Run configuration (YAML or JSON). Defaults to $EPGDESC_CONFIG or config.json.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Snapshot path. Defaults to $EPGDESC_OUTPUT or EPG/desc.json.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one extraction and persist the snapshot.
    Extract(RunArgs),
    /// Print per-channel description counts of an existing snapshot.
    Report {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run extractions on $EPGDESC_SYNC_CRON until interrupted.
    Schedule(RunArgs),
}

fn sync_config(args: RunArgs) -> SyncConfig {
    let mut config = SyncConfig::from_env();
    if let Some(path) = args.config {
        config.config_path = path;
    }
    if let Some(path) = args.output {
        config.output_path = path;
    }
    config
}

fn print_summary(summary: &RunSummary) {
    println!(
        "extraction complete: run_id={} target_channels={} new={} extended={} total={} channels={}",
        summary.run_id,
        summary.target_channels,
        summary.totals.inserted,
        summary.totals.extended,
        summary.total_descriptions,
        summary.channels_with_desc
    );
    for source in &summary.sources {
        match &source.outcome {
            FeedOutcome::Absorbed(stats) => println!(
                "  {}: absorbed={} skipped={} out_of_scope={}",
                source.name,
                stats.absorbed(),
                stats.skipped(),
                stats.out_of_scope
            ),
            FeedOutcome::FeedFailed { reason } => println!("  {}: failed: {reason}", source.name),
        }
    }
    println!(
        "snapshot: {} ({} bytes, sha256 {})",
        summary.snapshot.path, summary.snapshot.bytes, summary.snapshot.sha256
    );
    if let Some(log_path) = &summary.log_path {
        println!("log: {log_path}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Extract(RunArgs::default())) {
        Commands::Extract(args) => {
            let summary = SyncPipeline::new(sync_config(args))?.run_once().await?;
            print_summary(&summary);
        }
        Commands::Report { output } => {
            let path = output.unwrap_or_else(|| SyncConfig::from_env().output_path);
            print!("{}", report_snapshot(&path).await?);
        }
        Commands::Schedule(args) => {
            let config = sync_config(args);
            let cron = config.sync_cron.clone();
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let mut sched = pipeline.build_scheduler().await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press Ctrl-C to stop");

            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
