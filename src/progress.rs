//! Terminal progress bar for the `run` command.

use crate::pipeline::{JobFailure, PipelineObserver, progress_message};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {msg} ({elapsed})";

/// Observer that drives an `indicatif` progress bar.
///
/// Failures are printed above the bar; worker chatter goes to `tracing`
/// at debug level so it does not fight with the bar.
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new(total_jobs: usize) -> Self {
        let bar = ProgressBar::new(total_jobs as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(progress_message(0, total_jobs));
        Self { bar }
    }

    /// Wraps an existing bar, e.g. [`ProgressBar::hidden`] in tests.
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Removes the bar from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for ProgressBarObserver {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        self.bar.set_length(total as u64);
        self.bar.set_position(completed as u64);
        self.bar.set_message(message.to_string());
    }

    fn on_log(&self, line: &str) {
        tracing::debug!("{line}");
    }

    fn on_failure(&self, failure: &JobFailure) {
        self.bar
            .println(format!("{} {}", "failed:".red().bold(), failure));
    }
}
