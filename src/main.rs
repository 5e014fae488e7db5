use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use voxreel::app::{RunOptions, run_jobs_command};
use voxreel::chunker::{ChunkerConfig, split_text_with};
use voxreel::cli::{Cli, Commands, ConfigAction};
use voxreel::config::Config;
use voxreel::jobs::load_jobs;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Run {
            jobs,
            work_dir,
            join_timeout,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let report = run_jobs_command(
                config,
                &jobs,
                RunOptions {
                    work_dir,
                    join_timeout,
                    quiet: cli.quiet,
                },
            )?;
            if !report.is_complete_success() {
                std::process::exit(1);
            }
        }
        Commands::Split { file, budget } => {
            let config = load_config(cli.config.as_deref())?;
            handle_split(&file, budget, config.chunker_config())?;
        }
        Commands::Check { jobs } => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            println!("{} configuration is valid", "✓".green());
            if let Some(path) = jobs {
                let jobs = load_jobs(&path)?;
                println!("{} {} job(s) in {}", "✓".green(), jobs.len(), path.display());
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "voxreel", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays clean for summaries.
///
/// `RUST_LOG` wins over the verbosity flags.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "voxreel=debug,info",
        (false, _) => "voxreel=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voxreel/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn handle_split(file: &Path, budget: Option<usize>, mut chunker: ChunkerConfig) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if let Some(budget) = budget {
        chunker = ChunkerConfig {
            budget_bytes: budget,
            min_chunk_bytes: chunker.min_chunk_bytes.min(budget / 2),
        };
    }

    let chunks = split_text_with(&text, &chunker)?;
    for (index, chunk) in chunks.iter().enumerate() {
        println!(
            "{} {}",
            format!("[{:>3}] {:>5} bytes", index + 1, chunk.len()).dimmed(),
            chunk
        );
    }
    println!(
        "{} chunk(s), budget {} bytes",
        chunks.len(),
        chunker.budget_bytes
    );
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            for key in &mut config.call.keys {
                key.secret = "********".to_string();
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
