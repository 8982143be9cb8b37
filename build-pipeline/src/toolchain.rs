use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use common::error::AppError;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Characters of captured output kept in a failure detail.
const DIAGNOSTIC_TAIL_CHARS: usize = 4_000;

/// One external command: run `program` with `args` inside `working_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl CommandStep {
    pub fn new(
        id: impl Into<String>,
        program: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutcome {
    pub fn succeeded() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit status plus the tail of whatever the tool printed.
    pub fn diagnostics(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };

        let output = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };

        if output.is_empty() {
            status
        } else {
            format!("{status}: {}", tail(output, DIAGNOSTIC_TAIL_CHARS))
        }
    }
}

/// Runs a single external step and reports how it exited.
///
/// An `Err` means the step could not be run to an exit status at all
/// (spawn failure, timeout, cancellation).
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(
        &self,
        step: &CommandStep,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, AppError>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run(
        &self,
        step: &CommandStep,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, AppError> {
        let program = resolve_program(&step.program, &step.working_dir);

        let child = Command::new(&program)
            .args(&step.args)
            .current_dir(&step.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::BuildStep {
                step: step.id.clone(),
                diagnostics: format!("failed to start {}: {err}", program.display()),
            })?;

        // Dropping the wait future kills the child.
        let wait = child.wait_with_output();
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                    AppError::BuildStep {
                        step: step.id.clone(),
                        diagnostics: format!("timed out after {}s", limit.as_secs()),
                    }
                }),
                None => Ok(wait.await),
            }
        };

        let output = tokio::select! {
            result = bounded => result?.map_err(|err| AppError::BuildStep {
                step: step.id.clone(),
                diagnostics: format!("failed to collect output: {err}"),
            })?,
            () = cancel.cancelled() => {
                return Err(AppError::Cancelled(format!("step '{}' interrupted", step.id)));
            }
        };

        Ok(StepOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Executes steps strictly in order and stops at the first failure.
#[derive(Clone)]
pub struct ToolchainInvoker {
    runner: Arc<dyn StepRunner>,
}

impl ToolchainInvoker {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self { runner }
    }

    pub async fn run_step(
        &self,
        step: &CommandStep,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "step '{}' was not started",
                step.id
            )));
        }

        info!(step = %step.id, command = %step, "running toolchain step");
        let started = Instant::now();
        let outcome = self.runner.run(step, cancel).await?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !outcome.is_success() {
            warn!(
                step = %step.id,
                exit_code = ?outcome.exit_code,
                elapsed_ms,
                "toolchain step failed"
            );
            return Err(AppError::BuildStep {
                step: step.id.clone(),
                diagnostics: outcome.diagnostics(),
            });
        }

        debug!(step = %step.id, elapsed_ms, "toolchain step finished");
        Ok(outcome)
    }

    pub async fn run_all(
        &self,
        steps: &[CommandStep],
        cancel: &CancellationToken,
    ) -> Result<Vec<StepOutcome>, AppError> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            outcomes.push(self.run_step(step, cancel).await?);
        }
        Ok(outcomes)
    }
}

fn resolve_program(program: &str, working_dir: &Path) -> PathBuf {
    if program.starts_with("./") || program.starts_with("../") {
        working_dir.join(program)
    } else {
        PathBuf::from(program)
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count.saturating_sub(max_chars);
    text.char_indices()
        .nth(skip)
        .and_then(|(index, _)| text.get(index..))
        .unwrap_or(text)
}
