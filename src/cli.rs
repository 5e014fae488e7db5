//! Command-line interface for voxreel
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Batch pipeline for narrated media
#[derive(Parser, Debug)]
#[command(
    name = "voxreel",
    version,
    about = "Batch pipeline for narrated media: synthesize, render, combine"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress the progress bar and summary
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`30s`, `5m`, `1h30m`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every job in a job file through the pipeline
    Run {
        /// Job file (TOML, or JSON when it ends in .json)
        #[arg(value_name = "JOBS")]
        jobs: PathBuf,

        /// Directory for intermediate and final artifacts
        #[arg(long, value_name = "DIR")]
        work_dir: Option<PathBuf>,

        /// How long to wait for workers at shutdown. Examples: 10s, 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        join_timeout: Option<Duration>,
    },

    /// Show how a text file would be split into synthesis chunks
    Split {
        /// UTF-8 text file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Chunk budget in bytes (default: configured safe limit)
        #[arg(long, value_name = "BYTES")]
        budget: Option<usize>,
    },

    /// Validate the configuration and, optionally, a job file
    Check {
        /// Job file to validate
        #[arg(value_name = "JOBS")]
        jobs: Option<PathBuf>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, defaults and env overrides)
    Show,
    /// Print the configuration file path
    Path,
}
