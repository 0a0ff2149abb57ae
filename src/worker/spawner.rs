//! Worker process spawner.
//!
//! Launches the worker with all three standard streams piped and
//! `kill_on_drop(true)`, so a worker whose handle is dropped never outlives
//! its supervisor. The exit monitor owns the [`Child`] once the supervisor
//! has taken the pipes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::worker::supervisor::StreamEvent;
use crate::{AppError, Result};

// ── Configuration ────────────────────────────────────────────────────────────

/// Executable and arguments used to launch the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Executable path or name resolved through `PATH`.
    pub program: String,
    /// Ordered argument list.
    pub args: Vec<String>,
    /// Working directory; inherits the current one when `None`.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl SpawnConfig {
    /// Create a config for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    /// Append an argument, returning the updated config.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

// ── Connection handle ────────────────────────────────────────────────────────

/// Pipes and process handle of a freshly spawned worker.
#[derive(Debug)]
pub struct WorkerConnection {
    /// OS process id, if still available.
    pub pid: Option<u32>,
    /// Child handle; hand it to [`monitor_exit`] to observe exit.
    pub child: Child,
    /// Worker stdin, for commands.
    pub stdin: ChildStdin,
    /// Worker stdout.
    pub stdout: ChildStdout,
    /// Worker stderr.
    pub stderr: ChildStderr,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Launch the worker described by `config`.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn worker: …")`: OS spawn failure
///   (missing executable, permission denied, bad working directory).
/// - `AppError::Spawn("failed to capture worker …")`: a pipe was not
///   created.
pub fn spawn_worker(config: &SpawnConfig) -> Result<WorkerConnection> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn worker `{}`: {err}", config.program))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stderr".into()))?;

    let pid = child.id();
    info!(program = config.program.as_str(), pid, "spawned worker process");

    Ok(WorkerConnection {
        pid,
        child,
        stdin,
        stdout,
        stderr,
    })
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Spawn a background task that awaits worker exit and reports
/// [`StreamEvent::Exited`] for `generation`.
///
/// When `cancel` fires first, the task drops the child without reporting;
/// `kill_on_drop` then terminates the process.
#[must_use]
pub fn monitor_exit(
    generation: u64,
    mut child: Child,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let (exit_code, reason) = match result {
                    Ok(status) => {
                        let code = status.code();
                        let reason = code.map_or_else(
                            || "process terminated by signal".to_owned(),
                            |c| format!("process exited with code {c}"),
                        );
                        (code, reason)
                    }
                    Err(err) => {
                        warn!(generation, %err, "error waiting for worker process");
                        (None, format!("wait error: {err}"))
                    }
                };

                let event = StreamEvent::Exited {
                    generation,
                    exit_code,
                    reason,
                };
                if event_tx.send(event).await.is_err() {
                    debug!(generation, "supervisor gone before worker exit could be reported");
                }
            }
            () = cancel.cancelled() => {
                debug!(generation, "exit monitor cancelled, dropping worker");
            }
        }
    })
}
