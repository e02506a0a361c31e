//! Command-line interface for faultline.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// faultline - fault-injection and recovery orchestration for live hosts.
#[derive(Parser)]
#[command(name = "faultline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FAULTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "FAULTLINE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for reports and the execution timeline
    #[arg(long, env = "FAULTLINE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory for persisted session state
    #[arg(long, env = "FAULTLINE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Scheduling mode for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Sequential,
    Parallel,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Execute scenario and framework units
    Run {
        /// Scheduling mode
        #[arg(long, value_enum, default_value = "sequential")]
        mode: RunMode,

        /// Worker slots in parallel mode
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep scheduling after a failed unit (sequential mode)
        #[arg(long)]
        continue_on_failure: bool,

        /// Per-unit timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Retries for failed framework attempts
        #[arg(short, long)]
        retry: Option<u32>,

        /// Units to run: a category (network, service, system), a scenario
        /// name, or a framework (comprehensive, debug-validation, performance)
        #[arg(required = true)]
        units: Vec<String>,
    },

    /// List the scenario catalog
    Scenarios,

    /// Recover sessions left behind by a crashed run, then exit
    Recover,

    /// Show version information
    Version,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
