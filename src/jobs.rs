//! Job files for the command-line runner.
//!
//! A job file is TOML or JSON holding a `jobs` array:
//!
//! ```toml
//! [[jobs]]
//! id = "ep1"
//! name = "Episode 1"
//! payload = { text = "Hello there.", voice = "en-GB-Wavenet-B" }
//! ```

use crate::error::{Result, VoxreelError};
use crate::pipeline::Job;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct JobFile {
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Reads and checks a job file. `.json` files are parsed as JSON, anything
/// else as TOML.
pub fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let job_file_error = |message: String| VoxreelError::JobFile {
        path: path.display().to_string(),
        message,
    };

    let contents = fs::read_to_string(path).map_err(|e| job_file_error(e.to_string()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let file: JobFile = if is_json {
        serde_json::from_str(&contents).map_err(|e| job_file_error(e.to_string()))?
    } else {
        toml::from_str(&contents).map_err(|e| job_file_error(e.to_string()))?
    };

    validate_jobs(&file.jobs).map_err(job_file_error)?;
    tracing::debug!(path = %path.display(), jobs = file.jobs.len(), "job file loaded");
    Ok(file.jobs)
}

/// Job ids name artifact files, so they must be unique and path-safe.
fn validate_jobs(jobs: &[Job]) -> std::result::Result<(), String> {
    let mut seen = HashSet::new();
    for job in jobs {
        if job.id.is_empty() {
            return Err(format!("job '{}' has an empty id", job.name));
        }
        if job.id.contains(['/', '\\']) || job.id == "." || job.id == ".." {
            return Err(format!("job id '{}' is not a valid file name", job.id));
        }
        if !seen.insert(job.id.as_str()) {
            return Err(format!("duplicate job id '{}'", job.id));
        }
    }
    Ok(())
}
