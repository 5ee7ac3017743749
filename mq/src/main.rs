//! MeasureQueue - scheduled measurement test runner
//!
//! CLI entry point. `mq run` is the long-lived timer loop around the
//! schedule queue; the other subcommands inspect or poke persisted state.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{error, info, warn};

use measurequeue::cli::{Cli, Command, OutputFormat, get_log_path};
use measurequeue::config::Config;
use measurequeue::host::Host;
use measurequeue::store::QueueStore;

/// Wait before retrying after a cycle could not be persisted
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to the log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        groups = config.test_groups.len(),
        state_dir = %config.storage.state_dir.display(),
        "MeasureQueue loaded config"
    );

    match cli.command {
        Command::Run => cmd_run(cli.config, config).await,
        Command::Once { format } => cmd_once(&config, format),
        Command::Status { limit, format } => cmd_status(&config, limit, format),
        Command::Reset => cmd_reset(&config),
    }
}

/// Render a signed duration as `1d 2h 3m 4s`
fn format_duration(delta: TimeDelta) -> String {
    let sign = if delta < TimeDelta::zero() { "-" } else { "" };
    let total = delta.num_seconds().abs();
    let (days, hours, minutes, seconds) = (total / 86_400, total % 86_400 / 3600, total % 3600 / 60, total % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    format!("{}{}", sign, parts.join(" "))
}

/// Run a single cycle
fn cmd_once(config: &Config, format: OutputFormat) -> Result<()> {
    let mut host = Host::open(config, Utc::now())?;
    let report = host.cycle(Utc::now())?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "pruned": report.pruned,
                "executed": report.executed(),
                "denied": report.denied(),
                "failed": report.failed(),
                "extended": report.extended,
                "retry_scheduled": report.retry_scheduled,
                "sleep_ms": report.sleep.num_milliseconds(),
                "outcomes": report.outcomes,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!(
                "Executed: {}  Denied: {}  Failed: {}  Missed: {}",
                report.executed(),
                report.denied(),
                report.failed(),
                report.pruned
            );
            for outcome in &report.outcomes {
                let status = match &outcome.execution {
                    Some(execution) if execution.is_success() => "ok".green(),
                    Some(_) => "failed".red(),
                    None => "skipped (data cap)".yellow(),
                };
                println!("  {}  {}", outcome.entry, status);
            }
            println!("Next wake-up in {}", format_duration(report.sleep));
        }
    }
    Ok(())
}

/// Show the schedule window and upcoming entries
fn cmd_status(config: &Config, limit: usize, format: OutputFormat) -> Result<()> {
    let host = Host::open_read_only(config, Utc::now())?;
    let status = host.status(limit);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            println!("MeasureQueue Status");
            println!("-------------------");
            println!(
                "Window: {} .. {}",
                status.window_start.format("%Y-%m-%d %H:%M:%S"),
                status.window_end.format("%Y-%m-%d %H:%M:%S")
            );
            println!("Queued: {}", status.size);
            match status.data_cap_bytes {
                Some(cap) => println!("Data used: {} / {} bytes", status.data_used_bytes, cap),
                None => println!("Data used: {} bytes (no cap)", status.data_used_bytes),
            }

            if status.next.is_empty() {
                println!();
                println!("{}", "No upcoming tests".yellow());
            } else {
                println!();
                println!("Upcoming:");
                let now = Utc::now();
                for entry in &status.next {
                    println!("  {}  (in {})", entry, format_duration(entry.instant - now).as_str().dimmed());
                }
            }
        }
    }
    Ok(())
}

/// Discard persisted queue state
fn cmd_reset(config: &Config) -> Result<()> {
    let store = QueueStore::new(&config.storage.state_dir);
    let _lock = store.lock().context("Failed to lock queue state")?;
    if store.clear()? {
        println!("Removed {}", store.state_file().display());
    } else {
        println!("No queue state at {}", store.state_file().display());
    }
    Ok(())
}

/// Why the timer loop woke up
enum Wakeup {
    Timer,
    Reload,
    Shutdown,
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn wait(&mut self, sleep: Duration) -> Wakeup {
        tokio::select! {
            _ = tokio::time::sleep(sleep) => Wakeup::Timer,
            _ = self.hangup.recv() => {
                info!("SIGHUP received - reloading configuration");
                Wakeup::Reload
            }
            _ = self.interrupt.recv() => {
                warn!("SIGINT received");
                Wakeup::Shutdown
            }
            _ = self.terminate.recv() => {
                warn!("SIGTERM received");
                Wakeup::Shutdown
            }
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn wait(&mut self, sleep: Duration) -> Wakeup {
        tokio::select! {
            _ = tokio::time::sleep(sleep) => Wakeup::Timer,
            _ = tokio::signal::ctrl_c() => Wakeup::Shutdown,
        }
    }
}

/// Run the scheduler loop until a shutdown signal arrives
async fn cmd_run(config_path: Option<PathBuf>, config: Config) -> Result<()> {
    info!("Scheduler starting...");
    let mut host = Host::open(&config, Utc::now())?;
    let mut signals = Signals::new()?;

    println!(
        "MeasureQueue running: {} test groups, {} entries queued. Press Ctrl+C to stop, SIGHUP to reload config.",
        config.test_groups.len(),
        host.queue().len()
    );

    loop {
        // Test commands block; keep them off the runtime threads
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = host.cycle(Utc::now());
            (host, result)
        })
        .await
        .context("Cycle task panicked")?;
        host = returned;

        let sleep = match result {
            Ok(report) => report.sleep_std(),
            Err(e) => {
                error!(error = %e, "Cycle failed");
                ERROR_BACKOFF
            }
        };
        info!(sleep_secs = sleep.as_secs(), "Sleeping until next cycle");

        match signals.wait(sleep).await {
            Wakeup::Timer => {}
            Wakeup::Reload => match Config::load(config_path.as_ref()) {
                Ok(new_config) => {
                    if let Err(e) = host.reload(&new_config, Utc::now()) {
                        error!(error = %e, "Failed to apply reloaded configuration");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to reload configuration");
                }
            },
            Wakeup::Shutdown => break,
        }
    }

    info!("Scheduler shutting down...");
    Ok(())
}
