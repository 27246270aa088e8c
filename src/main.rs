use anyhow::{Context, Result};
use carbon_intensity_pipeline::{config, controller, savings, telemetry};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use config::Config;
use controller::{CycleScheduler, PipelineOrchestrator};
use savings::{DailySavingsScheduler, SavingsJob};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "carbon-intensity", version, about = "Grid carbon-intensity pipeline")]
struct Cli {
    /// Configuration file; defaults and CIP__* environment variables still apply
    #[arg(long, env = "CIP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline on its 10-minute cadence
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Compute per-user daily carbon savings
    Savings {
        /// Target date (YYYY-MM-DD); defaults to yesterday in the configured zone
        #[arg(long, conflicts_with = "schedule")]
        date: Option<NaiveDate>,
        /// Keep running and process each day just after local midnight
        #[arg(long)]
        schedule: bool,
        /// With --schedule, also process yesterday immediately
        #[arg(long, requires = "schedule")]
        run_now: bool,
    },
    /// Print rolling cache depth per region
    CacheStatus,
    /// Empty the rolling cache
    CacheClear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let _guard = telemetry::init_tracing(&cfg.logging);

    match cli.command {
        Command::Run { once } => run(&cfg, once).await,
        Command::Savings {
            schedule: true,
            run_now,
            ..
        } => schedule_savings(&cfg, run_now).await,
        Command::Savings { date, .. } => run_savings(&cfg, date),
        Command::CacheStatus => {
            let pipeline = PipelineOrchestrator::from_config(&cfg)?;
            let status = pipeline.cache_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            for (region, loaded) in pipeline.model_status() {
                info!(region = %region, loaded, "model status");
            }
            Ok(())
        }
        Command::CacheClear => {
            let mut pipeline = PipelineOrchestrator::from_config(&cfg)?;
            let now = Utc::now().with_timezone(&pipeline.tz()).fixed_offset();
            pipeline.clear_cache(now).context("failed to clear cache")?;
            warn!("rolling cache cleared");
            Ok(())
        }
    }
}

async fn run(cfg: &Config, once: bool) -> Result<()> {
    let mut pipeline = PipelineOrchestrator::from_config(cfg)?;
    let tz = pipeline.tz();

    if once {
        let now = Utc::now().with_timezone(&tz).fixed_offset();
        let outcome = pipeline.run_cycle(now).await?;
        info!(outcome = ?outcome, "single cycle finished");
        return Ok(());
    }

    info!(
        offset = cfg.pipeline.cycle_minute_offset,
        timezone = %tz,
        "starting carbon-intensity pipeline"
    );
    let scheduler = CycleScheduler::new(cfg.pipeline.cycle_minute_offset, tz);
    scheduler
        .run(&mut pipeline, telemetry::shutdown_signal())
        .await;

    let status = scheduler.status().await;
    warn!(
        runs = status.run_count,
        successes = status.success_count,
        errors = status.error_count,
        "shutdown complete"
    );
    Ok(())
}

fn run_savings(cfg: &Config, date: Option<NaiveDate>) -> Result<()> {
    let job = SavingsJob::from_config(cfg)?;
    let date = date.unwrap_or_else(|| job.yesterday(Utc::now()));

    let summary = job
        .run_for_date(date)
        .context("daily savings run failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn schedule_savings(cfg: &Config, run_now: bool) -> Result<()> {
    let job = SavingsJob::from_config(cfg)?;
    info!(timezone = %job.tz(), run_now, "starting daily savings scheduler");

    let scheduler = DailySavingsScheduler::new();
    scheduler
        .run(&job, run_now, telemetry::shutdown_signal())
        .await;

    let status = scheduler.status().await;
    warn!(
        runs = status.run_count,
        successes = status.success_count,
        errors = status.error_count,
        "savings scheduler shutdown complete"
    );
    Ok(())
}
