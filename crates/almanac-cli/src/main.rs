//! `almanac` — run configured tasks against the wall clock or a simulated
//! calendar window.

use std::path::PathBuf;
use std::time::Duration;

use almanac_core::{AlmanacConfig, SimulationConfig};
use almanac_events::{CalendarBoundary, EventKind, Notification};
use almanac_scheduler::{Scheduler, SimulationParams};
use anyhow::Context;
use chrono::{Datelike, NaiveDateTime, Timelike};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod tasks;

/// Calendar-driven task scheduler.
#[derive(Parser)]
#[command(name = "almanac", version, about)]
struct Cli {
    /// Path to TOML configuration file (defaults to $ALMANAC_CONFIG, then
    /// ~/.almanac/almanac.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured tasks against the wall clock until Ctrl-C.
    Run,

    /// Replay a calendar window as fast as the runtime allows (or paced).
    Simulate {
        /// Window start, local to the scheduler timezone (2020-01-01T00:00:00).
        #[arg(long)]
        start: Option<NaiveDateTime>,
        /// Window end, local to the scheduler timezone.
        #[arg(long)]
        end: Option<NaiveDateTime>,
        /// Logical seconds per tick.
        #[arg(long)]
        increment_secs: Option<u64>,
        /// Real milliseconds between ticks; 0 runs unpaced.
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Validate the config and print the task list as JSON.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("almanac=info,almanac_scheduler=info")),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > ALMANAC_CONFIG env > ~/.almanac/almanac.toml
    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("ALMANAC_CONFIG").ok());

    match cli.command {
        Command::Run => run(load_or_default(config_path.as_deref())).await,
        Command::Simulate {
            start,
            end,
            increment_secs,
            tick_ms,
        } => {
            let config = load_or_default(config_path.as_deref());
            let window = simulation_window(
                config.simulation.as_ref(),
                start,
                end,
                increment_secs,
                tick_ms,
            )?;
            simulate(config, window).await
        }
        Command::Check => check(config_path.as_deref()),
    }
}

fn load_or_default(path: Option<&str>) -> AlmanacConfig {
    AlmanacConfig::load(path).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        AlmanacConfig::default()
    })
}

fn build_scheduler(config: &AlmanacConfig) -> anyhow::Result<Scheduler> {
    let scheduler = Scheduler::from_config(&config.scheduler)?;
    let count = tasks::schedule_all(&scheduler, &config.tasks)?;
    tasks::log_warnings(&scheduler);
    scheduler.on(
        EventKind::Boundary(CalendarBoundary::NewDay),
        |n: &Notification| {
            if let Notification::Boundary { at, .. } = n {
                info!(day = %at, "new day");
            }
        },
    );
    info!(tasks = count, timezone = %scheduler.timezone(), "scheduler ready");
    Ok(scheduler)
}

async fn run(config: AlmanacConfig) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&config)?;
    scheduler.start_realtime()?;
    info!("almanac running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    scheduler.stop();
    info!("almanac stopped");
    Ok(())
}

/// Fully resolved simulation window, still in local wall-clock terms.
struct Window {
    start: NaiveDateTime,
    end: NaiveDateTime,
    increment_secs: u64,
    tick_ms: Option<u64>,
}

/// Merge CLI overrides over the `[simulation]` table.
fn simulation_window(
    configured: Option<&SimulationConfig>,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    increment_secs: Option<u64>,
    tick_ms: Option<u64>,
) -> anyhow::Result<Window> {
    let start = start
        .or(configured.map(|s| s.start))
        .context("no simulation start: pass --start or set [simulation].start")?;
    let end = end
        .or(configured.map(|s| s.end))
        .context("no simulation end: pass --end or set [simulation].end")?;
    let increment_secs = increment_secs
        .or(configured.map(|s| s.increment_secs))
        .unwrap_or(almanac_core::config::DEFAULT_SIMULATION_INCREMENT_SECS);
    let tick_ms = tick_ms.or(configured.and_then(|s| s.tick_interval_ms));

    if end <= start {
        anyhow::bail!("simulation end {end} is not after start {start}");
    }
    Ok(Window {
        start,
        end,
        increment_secs,
        tick_ms,
    })
}

fn local_timestamp(scheduler: &Scheduler, at: NaiveDateTime) -> anyhow::Result<i64> {
    Ok(scheduler.target_timestamp(
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
    )?)
}

async fn simulate(config: AlmanacConfig, window: Window) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&config)?;
    let start = local_timestamp(&scheduler, window.start)?;
    let end = local_timestamp(&scheduler, window.end)?;

    let increment_ms = i64::try_from(window.increment_secs.saturating_mul(1_000))
        .context("simulation increment too large")?;
    let mut params = SimulationParams::new(start, end).with_increment(increment_ms);
    if let Some(ms) = window.tick_ms {
        params = params.with_tick_interval(Duration::from_millis(ms));
    }

    let stopper = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let outcome = scheduler.start_simulated(params).await?;
    // Let the last dispatched job report before exiting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let summary = serde_json::json!({
        "outcome": outcome,
        "now": scheduler.format_now("%Y-%m-%dT%H:%M:%S%:z", None)?,
        "tasks": scheduler.tasks(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn check(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = AlmanacConfig::load(config_path).context("loading config")?;
    let scheduler = build_scheduler(&config)?;
    println!("{}", serde_json::to_string_pretty(&scheduler.tasks())?);
    Ok(())
}
