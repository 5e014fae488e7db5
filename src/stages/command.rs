//! External-command stage functions (tools such as espeak-ng or ffmpeg) with
//! testable command execution.
//!
//! The `CommandExecutor` trait keeps the stages testable without any tool
//! installed.

use crate::cancel::CancellationToken;
use crate::error::{Result, VoxreelError};
use crate::pipeline::{Artifact, Combiner, Job, Renderer, StageError, Synthesizer};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Longest stderr tail quoted in a failure message.
const MAX_STDERR: usize = 500;

/// How a command run ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Exited successfully with this stdout.
    Finished(String),
    /// Killed because the cancellation token fired.
    Aborted,
}

/// Trait for executing system commands.
///
/// Object-safe, Send + Sync so one executor can serve several stage threads.
pub trait CommandExecutor: Send + Sync {
    /// Runs `command` with `args` to completion or until `cancel` fires.
    ///
    /// Returns an error if the command is missing or exits unsuccessfully.
    fn execute(
        &self,
        command: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone)]
pub struct SystemCommandExecutor {
    poll_interval: Duration,
}

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Default for SystemCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(e) = pipe.read_to_end(&mut buf)
        {
            tracing::debug!("failed to read child output: {e}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn tail(text: &str, max_chars: usize) -> &str {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    text.char_indices()
        .nth(skip)
        .map_or(text, |(offset, _)| &text[offset..])
}

impl CommandExecutor for SystemCommandExecutor {
    fn execute(
        &self,
        command: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VoxreelError::StageCommandNotFound {
                        command: command.to_string(),
                    }
                } else {
                    VoxreelError::StageCommand {
                        message: format!("Failed to execute {}: {}", command, e),
                    }
                }
            })?;

        // Drain both pipes concurrently so a chatty tool never blocks on a
        // full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.wait_timeout(self.poll_interval) {
                tracing::debug!(command, "cancelled, killing child process");
                if let Err(e) = child.kill() {
                    tracing::warn!(command, "failed to kill child process: {e}");
                }
                if let Err(e) = child.wait() {
                    tracing::warn!(command, "failed to reap child process: {e}");
                }
                return Ok(ExecOutcome::Aborted);
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(VoxreelError::StageCommand {
                message: format!(
                    "{} exited with {}: {}",
                    command,
                    status,
                    tail(&stderr, MAX_STDERR)
                ),
            });
        }

        Ok(ExecOutcome::Finished(stdout))
    }
}

/// Values substituted into a command template.
#[derive(Debug)]
struct Placeholders<'a> {
    job: &'a Job,
    audio: Option<&'a Path>,
    visual: Option<&'a Path>,
    output: &'a Path,
    work_dir: &'a Path,
}

impl Placeholders<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.job.id.clone()),
            "name" => Some(self.job.name.clone()),
            "audio" => self.audio.map(|p| p.display().to_string()),
            "visual" => self.visual.map(|p| p.display().to_string()),
            "output" => Some(self.output.display().to_string()),
            "work_dir" => Some(self.work_dir.display().to_string()),
            _ => {
                let field = name.strip_prefix("payload.")?;
                match self.job.payload.get(field)? {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                }
            }
        }
    }

    /// Replaces every `{name}` in `template`. Unknown names are left as is,
    /// so literal braces (ffmpeg filter graphs) survive.
    fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => match self.lookup(&after[..close]) {
                    Some(value) => {
                        out.push_str(&value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = after;
                    }
                },
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Removes a half-written output file unless disarmed.
struct PartialOutput<'a> {
    path: &'a Path,
    armed: bool,
}

impl Drop for PartialOutput<'_> {
    fn drop(&mut self) {
        if self.armed
            && self.path.exists()
            && let Err(e) = fs::remove_file(self.path)
        {
            tracing::warn!(path = %self.path.display(), "failed to remove partial output: {e}");
        }
    }
}

/// Runs a templated external command to produce one artifact per job.
///
/// Usable for any stage; `{audio}` and `{visual}` are only filled in once
/// earlier stages have produced them.
///
/// The template's first element is the program, the rest are arguments.
/// Supported placeholders: `{id}`, `{name}`, `{audio}`, `{visual}`,
/// `{output}`, `{work_dir}` and `{payload.FIELD}`.
pub struct CommandStage {
    template: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
    work_dir: PathBuf,
    extension: String,
}

impl CommandStage {
    pub fn new(
        template: Vec<String>,
        executor: Arc<dyn CommandExecutor>,
        work_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Result<Self> {
        if template.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(VoxreelError::ConfigInvalidValue {
                key: "stages".to_string(),
                message: "command template must start with a program".to_string(),
            });
        }
        Ok(Self {
            template,
            executor,
            work_dir: work_dir.into(),
            extension: extension.into(),
        })
    }

    /// Where this stage writes the artifact for `job`.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.work_dir.join(format!("{}.{}", job.id, self.extension))
    }

    fn run(
        &self,
        job: &Job,
        audio: Option<&Path>,
        visual: Option<&Path>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Artifact, StageError> {
        let output = self.output_path(job);
        let placeholders = Placeholders {
            job,
            audio,
            visual,
            output: &output,
            work_dir: &self.work_dir,
        };
        let mut argv = self.template.iter().map(|part| placeholders.expand(part));
        let program = argv.next().unwrap_or_default();
        let args: Vec<String> = argv.collect();

        let mut partial = PartialOutput {
            path: &output,
            armed: true,
        };

        tracing::debug!(job = %job.id, program, ?args, "running stage command");
        match self.executor.execute(&program, &args, cancel)? {
            ExecOutcome::Aborted => return Err(StageError::Aborted),
            ExecOutcome::Finished(_) => {}
        }

        let bytes = fs::metadata(&output)
            .map_err(|_| {
                StageError::failed(format!(
                    "{} finished but did not produce {}",
                    program,
                    output.display()
                ))
            })?
            .len();
        partial.armed = false;
        Ok(Artifact::new(output.clone()).with_bytes(bytes))
    }
}

impl Synthesizer for CommandStage {
    fn synthesize(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> std::result::Result<Artifact, StageError> {
        self.run(job, None, None, cancel)
    }
}

impl Renderer for CommandStage {
    fn render(
        &self,
        job: &Job,
        audio: &Artifact,
        cancel: &CancellationToken,
    ) -> std::result::Result<Artifact, StageError> {
        self.run(job, Some(audio.path()), None, cancel)
    }
}

impl Combiner for CommandStage {
    fn combine(
        &self,
        job: &Job,
        audio: &Artifact,
        visual: &Artifact,
        cancel: &CancellationToken,
    ) -> std::result::Result<Artifact, StageError> {
        self.run(job, Some(audio.path()), Some(visual.path()), cancel)
    }
}
