//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// MeasureQueue - scheduled measurement test runner
#[derive(Parser)]
#[command(
    name = "mq",
    about = "Runs periodic measurement tests from a rolling schedule",
    version,
    after_help = "Logs are written to: ~/.local/share/measurequeue/logs/measurequeue.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler in the foreground until interrupted
    Run,

    /// Run a single cycle and print how long to sleep
    Once {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the schedule window and upcoming entries
    Status {
        /// Number of upcoming entries to list
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Discard persisted queue state
    Reset,
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("measurequeue")
        .join("logs")
        .join("measurequeue.log")
}
