//! Supervision of the external cluster-management process.
//!
//! Two launch modes: detached (the caller keeps the [`ManagedProcess`] and
//! is responsible for stopping it later) and bounded (the child runs on its
//! own task under an execution deadline; deadline expiry cancels the child
//! and is reported as success, not failure).
//!
//! The bounded runner hands the child's pid back through a oneshot promise
//! ([`BoundedRun::started`]) so no other task ever reads a process handle
//! before it is populated.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Grace between SIGTERM and SIGKILL when the bounded runner cancels its
/// own child.
const BOUNDED_STOP_GRACE: Duration = Duration::from_secs(5);

/// Errors from launching, signalling, or reaping the managed process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The handle was never populated with a live process. Indicates a
    /// launch-sequencing bug in the caller; always terminal.
    #[error("process handle was never initialized with a live process")]
    ProcessNotInitialized,

    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process exit")]
    Wait(#[source] std::io::Error),

    #[error("failed to signal pid {pid}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("bounded launch task panicked")]
    LaunchTaskPanicked,
}

/// Tagged result of waiting for a supervised process, produced once by the
/// wait path and pattern-matched by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with the given code.
    Code(i32),
    /// Terminated by the given signal.
    Signal(i32),
    /// No live process ever existed behind the wait.
    SpawnFailed,
}

impl ExitOutcome {
    /// Classify an OS wait status into the tagged outcome.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitOutcome::Signal(sig);
            }
        }
        ExitOutcome::SpawnFailed
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code {code}"),
            ExitOutcome::Signal(sig) => write!(f, "signal {sig}"),
            ExitOutcome::SpawnFailed => write!(f, "never spawned"),
        }
    }
}

/// How a bounded-mode launch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedExit {
    /// The child exited on its own before the deadline.
    Completed(ExitOutcome),
    /// The execution deadline elapsed and the child was cancelled. This is
    /// the intended outcome of a bounded run, not a failure.
    DeadlineElapsed,
    /// An external cancellation stopped the child before the deadline.
    Cancelled,
}

/// What to launch: program plus arguments.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// The spawned external executable. Exactly one is live per harness run.
///
/// Created by [`launch`]; transitions to exited either voluntarily or via
/// [`ManagedProcess::stop`]; resources are released once a wait returns.
#[derive(Debug)]
pub struct ManagedProcess {
    program: String,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Instant,
}

/// Launch the external executable in detached mode.
///
/// The child's stdout and stderr are piped and relayed line-by-line into
/// the harness log under the `cluster` target. The caller receives control
/// immediately and owns the handle's full lifecycle.
pub async fn launch(spec: &LaunchSpec) -> Result<ManagedProcess, SupervisorError> {
    let program = spec.program.display().to_string();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        program: program.clone(),
        source,
    })?;

    let pid = child.id();
    if let Some(stdout) = child.stdout.take() {
        relay_lines(stdout, "stdout", pid);
    }
    if let Some(stderr) = child.stderr.take() {
        relay_lines(stderr, "stderr", pid);
    }

    tracing::info!(program = %program, pid, "launched managed process");

    Ok(ManagedProcess {
        program,
        child: Some(child),
        pid,
        started_at: Instant::now(),
    })
}

impl ManagedProcess {
    /// A handle that carries no live process. [`ManagedProcess::stop`] on
    /// it fails with [`SupervisorError::ProcessNotInitialized`]; it exists
    /// so teardown-before-launch can be expressed and tested.
    pub fn unstarted(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
            pid: None,
            started_at: Instant::now(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Non-blocking liveness check.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Block until the process exits and classify the outcome.
    pub async fn wait(&mut self) -> Result<ExitOutcome, SupervisorError> {
        let Some(child) = self.child.as_mut() else {
            return Err(SupervisorError::ProcessNotInitialized);
        };
        let status = child.wait().await.map_err(SupervisorError::Wait)?;
        Ok(ExitOutcome::from_status(status))
    }

    /// Stop the process: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// A non-zero or signal-terminated exit is informational here -- the
    /// contract is that the OS process is gone afterwards, not that it
    /// exited cleanly. A process that already exited is tolerated and
    /// reported with its real outcome.
    pub async fn stop(&mut self, grace: Duration) -> Result<ExitOutcome, SupervisorError> {
        let Some(child) = self.child.as_mut() else {
            return Err(SupervisorError::ProcessNotInitialized);
        };

        if let Ok(Some(status)) = child.try_wait() {
            let outcome = ExitOutcome::from_status(status);
            tracing::info!(
                program = %self.program,
                outcome = %outcome,
                "process already exited before stop"
            );
            return Ok(outcome);
        }

        if let Some(pid) = child.id() {
            send_sigterm(pid)?;
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    let outcome = ExitOutcome::from_status(status);
                    tracing::info!(
                        program = %self.program,
                        pid,
                        outcome = %outcome,
                        "process stopped after interrupt"
                    );
                    return Ok(outcome);
                }
                Ok(Err(e)) => return Err(SupervisorError::Wait(e)),
                Err(_elapsed) => {
                    tracing::debug!(pid, "no exit within grace period, killing");
                }
            }
        }

        child.start_kill().map_err(SupervisorError::Wait)?;
        let status = child.wait().await.map_err(SupervisorError::Wait)?;
        let outcome = ExitOutcome::from_status(status);
        tracing::info!(program = %self.program, outcome = %outcome, "process killed");
        Ok(outcome)
    }
}

/// The bounded-mode launch: the child runs on its own task, and its pid is
/// delivered through [`BoundedRun::started`] once the process exists.
#[derive(Debug)]
pub struct BoundedRun {
    started: oneshot::Receiver<u32>,
    task: JoinHandle<Result<BoundedExit, SupervisorError>>,
}

/// Launch the executable under an execution deadline.
///
/// The child is cancelled automatically when `deadline` elapses
/// ([`BoundedExit::DeadlineElapsed`], success) or when `cancel` fires
/// ([`BoundedExit::Cancelled`]).
pub fn spawn_bounded(
    spec: LaunchSpec,
    deadline: Duration,
    cancel: CancellationToken,
) -> BoundedRun {
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(run_bounded(spec, deadline, cancel, tx));
    BoundedRun { started: rx, task }
}

impl BoundedRun {
    /// Wait for the child process to exist and return its pid.
    ///
    /// This is the handoff point: callers await it before polling readiness
    /// or otherwise dereferencing the process. If the launch failed before
    /// a process existed this returns `ProcessNotInitialized`; [`join`]
    /// carries the underlying spawn error.
    ///
    /// [`join`]: BoundedRun::join
    pub async fn started(&mut self) -> Result<u32, SupervisorError> {
        (&mut self.started)
            .await
            .map_err(|_| SupervisorError::ProcessNotInitialized)
    }

    /// Wait for the bounded run to finish.
    pub async fn join(self) -> Result<BoundedExit, SupervisorError> {
        self.task
            .await
            .map_err(|_| SupervisorError::LaunchTaskPanicked)?
    }
}

async fn run_bounded(
    spec: LaunchSpec,
    deadline: Duration,
    cancel: CancellationToken,
    started: oneshot::Sender<u32>,
) -> Result<BoundedExit, SupervisorError> {
    let mut process = launch(&spec).await?;
    if let Some(pid) = process.pid() {
        // The receiver may already be gone; the run proceeds regardless.
        let _ = started.send(pid);
    }

    let expiry = tokio::time::sleep(deadline);
    tokio::pin!(expiry);

    enum Stopped {
        Exited(ExitOutcome),
        Deadline,
        Cancelled,
    }

    let stopped = {
        let Some(child) = process.child.as_mut() else {
            return Err(SupervisorError::ProcessNotInitialized);
        };
        tokio::select! {
            status = child.wait() => {
                Stopped::Exited(ExitOutcome::from_status(status.map_err(SupervisorError::Wait)?))
            }
            _ = &mut expiry => Stopped::Deadline,
            _ = cancel.cancelled() => Stopped::Cancelled,
        }
    };

    match stopped {
        Stopped::Exited(outcome) => {
            tracing::info!(outcome = %outcome, "bounded launch completed before deadline");
            Ok(BoundedExit::Completed(outcome))
        }
        Stopped::Deadline => {
            let outcome = process.stop(BOUNDED_STOP_GRACE).await?;
            tracing::info!(
                deadline_secs = deadline.as_secs(),
                outcome = %outcome,
                "launch deadline elapsed, child cancelled"
            );
            Ok(BoundedExit::DeadlineElapsed)
        }
        Stopped::Cancelled => {
            let outcome = process.stop(BOUNDED_STOP_GRACE).await?;
            tracing::info!(outcome = %outcome, "bounded launch cancelled");
            Ok(BoundedExit::Cancelled)
        }
    }
}

/// Relay a child output stream into the harness log, line by line.
fn relay_lines<R>(reader: R, stream: &'static str, pid: Option<u32>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::info!(target: "cluster", pid, stream, "{line}");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(pid, stream, error = %e, "error reading child output");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<(), SupervisorError> {
    // SAFETY: pid comes from a child we spawned.
    let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone; the wait will pick up the status.
        return Ok(());
    }
    Err(SupervisorError::Signal { pid, source: err })
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) -> Result<(), SupervisorError> {
    Err(SupervisorError::Signal {
        pid,
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "signals are only supported on unix",
        ),
    })
}
