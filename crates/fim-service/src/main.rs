use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use fim_core::backup_store::{BackupStore, RestoreOutcome};
use fim_core::event_log::{EventLog, DEFAULT_MAX_BYTES};
use fim_core::hasher;
use fim_core::paths::data_dir;
use fim_core::settings::MonitorSettings;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fim_service::alerts::AlertSink;
use fim_service::integrity::clock::MonotonicClock;
use fim_service::integrity::scheduler::{self, FsWriter, Scheduler, TamperInjection};
use fim_service::monitor::establish_baseline;

const SETTINGS_FILE: &str = "fim.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Single-file integrity monitor with self-heal", long_about = None)]
struct Cli {
    /// Directory that relative paths are resolved against
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// JSON settings file (defaults to <data-dir>/fim.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the initial content, snapshot it, and monitor until Ctrl-C
    Run(RunArgs),
    /// List stored snapshots, oldest first
    Snapshots,
    /// Restore the latest snapshot onto the target once
    Restore,
    /// Print the current digest of the target
    Digest,
    /// Show recent security events
    Events {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only events at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Initial content of the target file
    #[arg(long)]
    content: Option<String>,
    #[arg(long)]
    poll_interval: Option<u64>,
    #[arg(long)]
    keep_backups: Option<usize>,
    #[arg(long)]
    heal_delay_ms: Option<u64>,
    /// Detect only, never restore
    #[arg(long)]
    no_self_heal: bool,
    /// Overwrite the target once after this many seconds (drill)
    #[arg(long)]
    simulate_tamper_after: Option<u64>,
    #[arg(long, default_value = "HACKED BY GHOST!\n")]
    tamper_payload: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let base = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => data_dir()?,
    };
    let mut settings = load_settings(&base, cli.config.as_ref())?;

    match cli.command {
        Commands::Run(args) => {
            apply_overrides(&mut settings, &args);
            settings.validate()?;
            run_command(settings.resolve(&base), args).await
        }
        Commands::Snapshots => snapshots_command(&settings.resolve(&base)),
        Commands::Restore => restore_command(&settings.resolve(&base)),
        Commands::Digest => digest_command(&settings.resolve(&base)),
        Commands::Events { limit, since } => {
            events_command(&settings.resolve(&base), limit, since)
        }
    }
}

fn load_settings(base: &std::path::Path, config: Option<&PathBuf>) -> Result<MonitorSettings> {
    let settings = match config {
        Some(path) => MonitorSettings::load(path)?,
        None => {
            let default_path = base.join(SETTINGS_FILE);
            if default_path.exists() {
                MonitorSettings::load(&default_path)?
            } else {
                MonitorSettings::default()
            }
        }
    };
    Ok(settings)
}

fn apply_overrides(settings: &mut MonitorSettings, args: &RunArgs) {
    if let Some(content) = &args.content {
        settings.initial_content = content.clone();
    }
    if let Some(secs) = args.poll_interval {
        settings.poll_interval_secs = secs;
    }
    if let Some(keep) = args.keep_backups {
        settings.keep_backups = keep;
    }
    if let Some(ms) = args.heal_delay_ms {
        settings.heal_delay_ms = ms;
    }
    if args.no_self_heal {
        settings.self_heal = false;
    }
}

async fn run_command(settings: MonitorSettings, args: RunArgs) -> Result<()> {
    let event_log = match EventLog::new(&settings.log_path, DEFAULT_MAX_BYTES) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "event log unavailable; alerts go to console only");
            None
        }
    };
    let alerts = AlertSink::new(event_log);

    let content = if settings.initial_content.is_empty() {
        fim_core::settings::DEFAULT_CONTENT.to_string()
    } else {
        settings.initial_content.clone()
    };
    let engine = establish_baseline(&settings, content.as_bytes(), &alerts)?;

    let mut scheduler = Scheduler::new(engine);
    if let Some(secs) = args.simulate_tamper_after {
        info!(after_secs = secs, "tamper drill armed");
        scheduler = scheduler.with_tamper(TamperInjection::new(
            Duration::from_secs(secs),
            args.tamper_payload.into_bytes(),
            Box::new(FsWriter),
        ));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(scheduler::run(
        scheduler,
        MonotonicClock::start(),
        scheduler::DEFAULT_CADENCE,
        shutdown_rx,
        move |event| alerts.tick_event(event),
    ));

    signal::ctrl_c().await?;
    info!("stopping");
    let _ = shutdown_tx.send(true);
    monitor.await.context("monitor task panicked")??;
    Ok(())
}

fn store_for(settings: &MonitorSettings) -> Result<BackupStore> {
    Ok(BackupStore::new(&settings.backup_dir, &settings.snapshot_prefix)?)
}

fn snapshots_command(settings: &MonitorSettings) -> Result<()> {
    let catalog = store_for(settings)?.catalog()?;
    if catalog.is_empty() {
        println!("no snapshots in {}", settings.backup_dir.display());
        return Ok(());
    }
    for snapshot in catalog {
        println!(
            "{}  {}  {} bytes",
            snapshot.id,
            snapshot.taken_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.size
        );
    }
    Ok(())
}

fn restore_command(settings: &MonitorSettings) -> Result<()> {
    match store_for(settings)?.restore_latest(&settings.target_path) {
        RestoreOutcome::Restored { snapshot, digest } => {
            println!("restored {} from {}", settings.target_path.display(), snapshot);
            println!("{digest}");
            Ok(())
        }
        RestoreOutcome::NoBackups => Err(anyhow!(
            "no backups available in {}",
            settings.backup_dir.display()
        )),
        RestoreOutcome::Failed { error } => Err(anyhow!("restore failed: {error}")),
    }
}

fn digest_command(settings: &MonitorSettings) -> Result<()> {
    match hasher::digest_file(&settings.target_path) {
        Some(digest) => println!("{digest}  {}", settings.target_path.display()),
        None => println!("missing  {}", settings.target_path.display()),
    }
    Ok(())
}

fn events_command(
    settings: &MonitorSettings,
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> Result<()> {
    let log = EventLog::new(&settings.log_path, DEFAULT_MAX_BYTES)?;
    for entry in log.read_recent(since, Some(limit))? {
        println!(
            "{} - [{:?}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.severity,
            entry.message
        );
    }
    Ok(())
}
