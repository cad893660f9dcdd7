//! External design-tool supervision.
//!
//! [`ToolSupervisor::invoke`] drives one [`ExecutionDescriptor`] through the attempt state
//! machine: it renders the command, runs it through a [`ProcessRunner`], persists the captured
//! streams under `logs/`, checks the declared outputs, and retries failed or timed-out
//! attempts until `max_attempts` is reached. The tool itself is opaque; nothing beyond the
//! presence of declared outputs is inspected.

pub mod descriptor;
pub mod runner;
pub mod state;

pub use descriptor::{CommandLine, ExecutionDescriptor, Mount, Program, TemplateError, TemplateVars};
pub use runner::{
    CancelHandle, CancelSignal, ProcessOutput, ProcessRunner, RunOutcome, SpawnError,
    TokioProcessRunner,
};
pub use state::{AttemptOutcome, InvocationState, InvocationStateMachine, Step, Transition};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Lines of stderr kept in a failure diagnostic.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Why a tool invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind")]
pub enum ToolFailure {
    #[error("tool exceeded its {timeout_secs}s wall-clock limit")]
    ToolTimeout { timeout_secs: u64 },
    #[error("tool exited with status {}", describe_exit(.exit_code))]
    ToolFailed { exit_code: Option<i32> },
    #[error("tool finished without declared outputs: {}", .paths.join(", "))]
    MissingOutputArtifact { paths: Vec<String> },
    #[error("tool run was cancelled")]
    Cancelled,
    #[error("tool could not be started: {reason}")]
    SpawnFailed { reason: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Outcome of one supervised tool, as reported in the job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool: String,
    /// Terminal state: `succeeded` or `failed`.
    pub status: InvocationState,
    /// Exit code of the last attempt, if the process exited on its own.
    pub exit_status: Option<i32>,
    pub attempts_made: u32,
    pub elapsed_secs: f64,
    pub output_artifacts: Vec<PathBuf>,
    pub diagnostic: Option<String>,
    pub failure: Option<ToolFailure>,
    pub command: String,
    pub transitions: Vec<Transition>,
}

impl ToolInvocationResult {
    pub fn succeeded(&self) -> bool {
        self.status == InvocationState::Succeeded
    }

    /// Result for a tool that failed before its first attempt.
    pub fn rejected(tool: impl Into<String>, failure: ToolFailure) -> Self {
        let mut machine = InvocationStateMachine::new(1);
        abort(&mut machine, &failure);
        Self {
            tool: tool.into(),
            status: InvocationState::Failed,
            exit_status: None,
            attempts_made: 0,
            elapsed_secs: 0.0,
            output_artifacts: Vec::new(),
            diagnostic: Some(failure.to_string()),
            failure: Some(failure),
            command: String::new(),
            transitions: machine.into_log(),
        }
    }
}

/// Runs tool invocations through a shared [`ProcessRunner`].
#[derive(Clone)]
pub struct ToolSupervisor {
    runner: Arc<dyn ProcessRunner>,
}

impl Default for ToolSupervisor {
    fn default() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }
}

impl ToolSupervisor {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Runs `descriptor` to a terminal state. Never returns an error; every failure is
    /// described in the result.
    pub async fn invoke(
        &self,
        descriptor: &ExecutionDescriptor,
        vars: &TemplateVars,
        cancel: CancelSignal,
    ) -> ToolInvocationResult {
        let started = Instant::now();
        let tool = descriptor.tool.as_str();
        let mut machine = InvocationStateMachine::new(descriptor.max_attempts);
        let mut last = AttemptReport::default();

        let rendered = match descriptor.render_args(vars) {
            Ok(rendered) => rendered,
            Err(err) => {
                let failure = ToolFailure::SpawnFailed {
                    reason: err.to_string(),
                };
                abort(&mut machine, &failure);
                return finish(descriptor, String::new(), machine, started, last.with_failure(failure));
            }
        };
        let mut command_text = descriptor.command_with(rendered.clone(), 1).to_string();

        if let Err(err) = tokio::fs::create_dir_all(descriptor.workdir.join("logs")).await {
            let failure = ToolFailure::SpawnFailed {
                reason: format!("cannot prepare {}: {err}", descriptor.workdir.display()),
            };
            abort(&mut machine, &failure);
            return finish(descriptor, command_text, machine, started, last.with_failure(failure));
        }

        loop {
            if cancel.is_cancelled() {
                last = last.with_failure(ToolFailure::Cancelled);
                abort(&mut machine, &ToolFailure::Cancelled);
                break;
            }

            let attempt = match machine.start() {
                Ok(attempt) => attempt,
                Err(err) => {
                    error!(tool, error = %err, "invocation state machine rejected a new attempt");
                    break;
                }
            };
            let command = descriptor.command_with(rendered.clone(), attempt);
            command_text = command.to_string();
            info!(tool, attempt, command = %command_text, "starting tool attempt");

            let outcome = self
                .runner
                .run(&command, descriptor.timeout, &cancel)
                .await;
            last = self.assess(descriptor, outcome).await;

            let recorded = match &last.failure {
                None => machine.record(AttemptOutcome::Succeeded, None),
                Some(ToolFailure::Cancelled) => {
                    abort(&mut machine, &ToolFailure::Cancelled);
                    break;
                }
                Some(failure @ ToolFailure::ToolTimeout { .. }) => {
                    warn!(tool, attempt, "{failure}");
                    machine.record(AttemptOutcome::TimedOut, Some(failure.to_string()))
                }
                Some(failure) => {
                    warn!(tool, attempt, "{failure}");
                    machine.record(AttemptOutcome::Failed, Some(failure.to_string()))
                }
            };

            match recorded {
                Ok(Step::Retry) => continue,
                Ok(Step::Done) => break,
                Err(err) => {
                    error!(tool, error = %err, "invalid invocation state transition");
                    break;
                }
            }
        }

        finish(descriptor, command_text, machine, started, last)
    }

    /// Turns one run into the attempt's failure (if any), persisting its logs.
    async fn assess(
        &self,
        descriptor: &ExecutionDescriptor,
        outcome: Result<RunOutcome, SpawnError>,
    ) -> AttemptReport {
        let output = match &outcome {
            Ok(RunOutcome::Exited(out) | RunOutcome::TimedOut(out) | RunOutcome::Cancelled(out)) => {
                write_logs(descriptor, out).await;
                Some(out)
            }
            Err(_) => None,
        };
        let diagnostic = output.and_then(|out| stderr_tail(&out.stderr));

        let failure = match &outcome {
            Err(err) => Some(ToolFailure::SpawnFailed {
                reason: err.to_string(),
            }),
            Ok(RunOutcome::TimedOut(_)) => Some(ToolFailure::ToolTimeout {
                timeout_secs: descriptor.timeout.as_secs(),
            }),
            Ok(RunOutcome::Cancelled(_)) => Some(ToolFailure::Cancelled),
            Ok(RunOutcome::Exited(out)) if !out.success() => Some(ToolFailure::ToolFailed {
                exit_code: out.exit_code,
            }),
            Ok(RunOutcome::Exited(_)) => None,
        };

        let (artifacts, failure) = match failure {
            Some(failure) => (Vec::new(), Some(failure)),
            None => match collect_outputs(&descriptor.workdir, &descriptor.outputs) {
                Ok(artifacts) => (artifacts, None),
                Err(paths) => (Vec::new(), Some(ToolFailure::MissingOutputArtifact { paths })),
            },
        };

        AttemptReport {
            exit_status: output.and_then(|out| out.exit_code),
            artifacts,
            diagnostic,
            failure,
        }
    }
}

#[derive(Debug, Default)]
struct AttemptReport {
    exit_status: Option<i32>,
    artifacts: Vec<PathBuf>,
    diagnostic: Option<String>,
    failure: Option<ToolFailure>,
}

impl AttemptReport {
    fn with_failure(mut self, failure: ToolFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

fn abort(machine: &mut InvocationStateMachine, failure: &ToolFailure) {
    if let Err(err) = machine.abort(failure.to_string()) {
        error!(error = %err, "invalid invocation state transition");
    }
}

fn finish(
    descriptor: &ExecutionDescriptor,
    command: String,
    machine: InvocationStateMachine,
    started: Instant,
    last: AttemptReport,
) -> ToolInvocationResult {
    let elapsed = started.elapsed();
    let status = match machine.state() {
        InvocationState::Succeeded => InvocationState::Succeeded,
        _ => InvocationState::Failed,
    };
    let attempts_made = machine.attempts_made();

    let diagnostic = match (&last.failure, last.diagnostic) {
        (None, _) => None,
        (Some(failure), Some(tail)) => Some(format!("{failure}\n{tail}")),
        (Some(failure), None) => Some(failure.to_string()),
    };

    if status == InvocationState::Succeeded {
        info!(
            tool = %descriptor.tool,
            attempts = attempts_made,
            elapsed = ?elapsed,
            artifacts = last.artifacts.len(),
            "tool succeeded"
        );
    } else {
        warn!(
            tool = %descriptor.tool,
            attempts = attempts_made,
            elapsed = ?elapsed,
            failure = ?last.failure,
            "tool failed"
        );
    }

    ToolInvocationResult {
        tool: descriptor.tool.clone(),
        status,
        exit_status: last.exit_status,
        attempts_made,
        elapsed_secs: duration_secs(elapsed),
        output_artifacts: last.artifacts,
        diagnostic,
        failure: last.failure,
        command,
        transitions: machine.into_log(),
    }
}

fn duration_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}

async fn write_logs(descriptor: &ExecutionDescriptor, output: &ProcessOutput) {
    let logs = descriptor.workdir.join("logs");
    for (stream, bytes) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        let path = logs.join(format!("{}.{stream}.log", descriptor.tool));
        if let Err(err) = tokio::fs::write(&path, bytes).await {
            warn!(path = %path.display(), error = %err, "failed to persist tool log");
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    Some(lines[start..].join("\n"))
}

/// Resolves declared outputs against `workdir`.
///
/// Returns every concrete artifact in sorted order, or the declarations that matched nothing.
pub fn collect_outputs(workdir: &Path, declared: &[String]) -> Result<Vec<PathBuf>, Vec<String>> {
    let mut found = Vec::new();
    let mut missing = Vec::new();

    for pattern in declared {
        let matches = match pattern.rsplit_once('/') {
            _ if !pattern.contains('*') => {
                let path = workdir.join(pattern);
                if path.exists() { vec![path] } else { Vec::new() }
            }
            Some((dir, name)) => glob_dir(&workdir.join(dir), name),
            None => glob_dir(workdir, pattern),
        };
        if matches.is_empty() {
            missing.push(pattern.clone());
        }
        found.extend(matches);
    }

    if !missing.is_empty() {
        return Err(missing);
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn glob_dir(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| wildcard_match(pattern, name))
        })
        .collect()
}

/// Matches `name` against a pattern where `*` stands for any run of characters.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let [first, middle @ .., last] = parts.as_slice() else {
        return pattern == name;
    };
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
