//! Batch run entry point.
//!
//! Wires the configuration into stage functions and drives one batch:
//! load jobs → synthesize → render → combine → summary

#[cfg(feature = "http")]
use crate::call::{ChunkedSynthesis, HttpTransport, ResilientClient};
use crate::config::Config;
use crate::error::Result;
use crate::jobs::load_jobs;
use crate::pipeline::{
    LogObserver, Pipeline, PipelineObserver, PipelineReport, StageFunctions, Synthesizer,
};
use crate::progress::ProgressBarObserver;
#[cfg(feature = "http")]
use crate::stages::SpeechSynthesizer;
use crate::stages::{CommandExecutor, CommandStage, SystemCommandExecutor};
use owo_colors::OwoColorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Command-line overrides for a batch run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub work_dir: Option<PathBuf>,
    pub join_timeout: Option<Duration>,
    pub quiet: bool,
}

/// Builds the three stage functions from the configuration.
///
/// Stage 1 calls the speech endpoint when `call.endpoint` is set and the
/// `stages.synthesize` command otherwise. Stages 2 and 3 always run their
/// configured commands.
pub fn build_stages(config: &Config, work_dir: &Path) -> Result<StageFunctions> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(SystemCommandExecutor::new());
    let stages = &config.stages;

    let synthesizer = build_synthesizer(config, work_dir, &executor)?;
    let renderer = CommandStage::new(
        stages.render.clone(),
        executor.clone(),
        work_dir,
        &stages.visual_extension,
    )?;
    let combiner = CommandStage::new(
        stages.combine.clone(),
        executor,
        work_dir,
        &stages.output_extension,
    )?;

    Ok(StageFunctions {
        synthesizer,
        renderer: Arc::new(renderer),
        combiner: Arc::new(combiner),
    })
}

fn build_synthesizer(
    config: &Config,
    work_dir: &Path,
    executor: &Arc<dyn CommandExecutor>,
) -> Result<Arc<dyn Synthesizer>> {
    match config.call.endpoint.as_deref() {
        #[cfg(feature = "http")]
        Some(endpoint) => {
            let transport =
                HttpTransport::new(endpoint)?.with_key_header(config.call.key_header.clone());
            let client = ResilientClient::new(Arc::new(transport), config.retry_policy());
            let synthesis = ChunkedSynthesis::new(client, config.quota_tracker())
                .with_chunker(config.chunker_config());
            tracing::info!(endpoint, "synthesizing through speech endpoint");
            Ok(Arc::new(SpeechSynthesizer::new(
                synthesis,
                work_dir,
                &config.stages.audio_extension,
                &config.call.voice,
            )))
        }
        #[cfg(not(feature = "http"))]
        Some(_) => Err(crate::error::VoxreelError::ConfigInvalidValue {
            key: "call.endpoint".to_string(),
            message: "this build has no HTTP support; rebuild with the `http` feature"
                .to_string(),
        }),
        None => {
            tracing::info!("synthesizing through stages.synthesize command");
            let stage = CommandStage::new(
                config.stages.synthesize.clone(),
                executor.clone(),
                work_dir,
                &config.stages.audio_extension,
            )?;
            Ok(Arc::new(stage))
        }
    }
}

/// Runs every job in `jobs_path` and prints a summary.
///
/// # Returns
/// The batch report; failed jobs are in `errors`, not an `Err`.
pub fn run_jobs_command(
    config: Config,
    jobs_path: &Path,
    options: RunOptions,
) -> Result<PipelineReport> {
    config.validate()?;
    let jobs = load_jobs(jobs_path)?;
    if jobs.is_empty() {
        tracing::warn!(path = %jobs_path.display(), "job file has no jobs");
    }

    let work_dir = options
        .work_dir
        .unwrap_or_else(|| config.stages.work_dir.clone());
    fs::create_dir_all(&work_dir)?;

    let stages = build_stages(&config, &work_dir)?;
    let mut pipeline_config = config.pipeline_config();
    if let Some(timeout) = options.join_timeout {
        pipeline_config.join_timeout = timeout;
    }

    let bar = (!options.quiet).then(|| Arc::new(ProgressBarObserver::new(jobs.len())));
    let observer: Arc<dyn PipelineObserver> = match &bar {
        Some(bar) => bar.clone(),
        None => Arc::new(LogObserver),
    };

    let mut pipeline = Pipeline::new(pipeline_config, stages).with_observer(observer);
    for job in jobs {
        pipeline.add_job(job);
    }

    tracing::info!(
        jobs = pipeline.total_jobs(),
        work_dir = %work_dir.display(),
        "starting batch"
    );
    let started = Instant::now();
    let handle = pipeline.start()?;
    handle.finish_adding_jobs();
    let report = handle.wait_completion();

    if let Some(bar) = &bar {
        bar.finish();
    }
    if !options.quiet {
        print_summary(&report, started.elapsed());
    }
    Ok(report)
}

fn print_summary(report: &PipelineReport, elapsed: Duration) {
    let elapsed = humantime::format_duration(Duration::from_secs(elapsed.as_secs()));
    let headline = format!(
        "{}/{} jobs completed in {}",
        report.results.len(),
        report.total_jobs,
        elapsed
    );
    if report.is_complete_success() {
        println!("{} {}", "✓".green().bold(), headline);
    } else {
        println!("{} {}", "!".yellow().bold(), headline);
    }

    for done in &report.results {
        println!("  {} {}", done.job.id.cyan(), done.output.path().display());
    }
    for failure in &report.errors {
        eprintln!("  {} {}", "✗".red(), failure);
    }
    if report.cancelled {
        eprintln!("  {}", "batch was cancelled".yellow());
    }
    if report.detached_workers > 0 {
        eprintln!(
            "  {} {} worker(s) were still busy at shutdown and were detached",
            "warning:".yellow().bold(),
            report.detached_workers
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.stages.work_dir = dir.join("out");
        config
    }

    #[test]
    fn test_build_stages_with_command_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(build_stages(&config, dir.path()).is_ok());
    }

    #[test]
    fn test_build_stages_rejects_empty_render_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.stages.render.clear();
        assert!(build_stages(&config, dir.path()).is_err());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_build_stages_with_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.call.endpoint = Some("http://127.0.0.1:9/synthesize".to_string());
        config.stages.synthesize.clear();
        assert!(build_stages(&config, dir.path()).is_ok());
    }

    #[test]
    fn test_run_rejects_invalid_config_before_loading_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.call.max_retries = 0;

        let err = run_jobs_command(
            config,
            &dir.path().join("missing.toml"),
            RunOptions {
                quiet: true,
                ..RunOptions::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("call.max_retries"));
    }

    #[test]
    fn test_run_empty_job_file_creates_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = dir.path().join("jobs.toml");
        fs::write(&jobs, "").unwrap();
        let config = config_in(dir.path());

        let report = run_jobs_command(
            config,
            &jobs,
            RunOptions {
                quiet: true,
                ..RunOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.total_jobs, 0);
        assert!(report.is_complete_success());
        assert!(dir.path().join("out").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_shell_commands() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = dir.path().join("jobs.toml");
        fs::write(
            &jobs,
            r#"
[[jobs]]
id = "one"
name = "One"
payload = { text = "hello" }

[[jobs]]
id = "two"
name = "Two"
payload = { text = "world" }
"#,
        )
        .unwrap();

        let sh = |script: &str| -> Vec<String> {
            ["sh", "-c", script].iter().map(|s| s.to_string()).collect()
        };
        let mut config = config_in(dir.path());
        config.stages.synthesize = sh("printf '%s' '{payload.text}' > '{output}'");
        config.stages.render = sh("cp '{audio}' '{output}'");
        config.stages.combine = sh("cat '{visual}' '{audio}' > '{output}'");

        let report = run_jobs_command(
            config,
            &jobs,
            RunOptions {
                quiet: true,
                ..RunOptions::default()
            },
        )
        .unwrap();

        assert!(report.is_complete_success(), "errors: {:?}", report.errors);
        let out = dir.path().join("out");
        assert_eq!(fs::read_to_string(out.join("one.mp4")).unwrap(), "hellohello");
        assert_eq!(fs::read_to_string(out.join("two.mp4")).unwrap(), "worldworld");
    }
}
