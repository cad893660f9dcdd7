//! Process execution behind the [`ProcessRunner`] seam.

use super::descriptor::CommandLine;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long captured pipes may stay open after the child is killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Wall-clock limit for a command's teardown step.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(ProcessOutput),
    /// Killed after exceeding the wall-clock limit; output holds what was captured.
    TimedOut(ProcessOutput),
    Cancelled(ProcessOutput),
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Requests cancellation of every run holding one of its signals.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        CancelHandle::new().signal()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Runs one command to completion, timeout, or cancellation.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome, SpawnError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// On unix every run gets its own process group. The whole group is killed once the run
/// ends, on timeout, on cancellation, and when the run future is dropped, so background
/// descendants never outlive their run. After a timeout or cancellation the command's
/// teardown (if any) runs as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

enum Ending {
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome, SpawnError> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        let mut child = process.spawn().map_err(|source| SpawnError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::new(child.id());
        debug!(program = %command.program, pid = ?child.id(), "spawned process");

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

        let mut cancel = cancel.clone();
        let ending = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|source| SpawnError::Wait {
                    program: command.program.clone(),
                    source,
                })?;
                Ending::Exited(status.code())
            }
            _ = tokio::time::sleep(timeout) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        };

        group.kill();
        if !matches!(ending, Ending::Exited(_)) {
            if let Err(err) = child.kill().await {
                warn!(program = %command.program, error = %err, "failed to kill process");
            }
            if let Some(teardown) = &command.teardown {
                run_teardown(teardown, &command.cwd).await;
            }
        }

        let exit_code = match ending {
            Ending::Exited(code) => code,
            Ending::TimedOut | Ending::Cancelled => None,
        };
        let output = ProcessOutput {
            exit_code,
            stdout: drain(stdout).await,
            stderr: drain(stderr).await,
        };

        Ok(match ending {
            Ending::Exited(_) => RunOutcome::Exited(output),
            Ending::TimedOut => RunOutcome::TimedOut(output),
            Ending::Cancelled => RunOutcome::Cancelled(output),
        })
    }
}

/// Process group led by a spawned child; killed at most once, at the latest on drop.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only delivers a signal; a group that is already gone reports ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

async fn run_teardown(argv: &[String], cwd: &std::path::Path) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    match tokio::time::timeout(TEARDOWN_TIMEOUT, status).await {
        Ok(Ok(status)) if status.success() => debug!(program, "teardown finished"),
        Ok(Ok(status)) => warn!(program, code = ?status.code(), "teardown exited unsuccessfully"),
        Ok(Err(err)) => warn!(program, error = %err, "teardown could not be started"),
        Err(_) => warn!(program, "teardown timed out"),
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        debug!(error = %err, "stopped reading process pipe");
    }
    buffer
}

async fn drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}
