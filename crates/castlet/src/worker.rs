//! Worker process handle: spawning, stderr forwarding, terminate
//! escalation.
//!
//! The daemon owns the lifecycle; this module owns the mechanics of getting
//! a process with three piped streams and taking it down again.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::DaemonError;

/// Extension point for different worker launch strategies (bundled binary,
/// interpreter + script, test stand-ins).
///
/// Implementations must pipe all three standard streams; [`spawn_worker`]
/// rejects a child with any stream missing.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> io::Result<Child>;
}

/// Spawner for a worker executable plus fixed arguments.
pub struct ExecSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ExecSpawner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl WorkerSpawner for ExecSpawner {
    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// A freshly spawned worker with its streams detached for wiring.
pub(crate) struct SpawnedWorker {
    pub child: Child,
    pub pid: Option<u32>,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub(crate) fn spawn_worker(spawner: &dyn WorkerSpawner) -> Result<SpawnedWorker, DaemonError> {
    let mut child = spawner.spawn().map_err(DaemonError::Spawn)?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| stream_missing("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| stream_missing("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| stream_missing("stderr"))?;
    let pid = child.id();

    Ok(SpawnedWorker {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}

fn stream_missing(name: &str) -> DaemonError {
    DaemonError::Spawn(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("worker {name} not piped"),
    ))
}

/// Forward worker stderr lines into tracing. Diagnostic only — stderr is not
/// part of the RPC protocol.
pub(crate) fn forward_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim_end();
            if !trimmed.is_empty() {
                tracing::info!(target: "castlet::worker", "{}", trimmed);
            }
        }
    })
}

/// Wait up to `grace` for the worker to exit on its own, then escalate:
/// SIGTERM, wait `sigkill_grace`, SIGKILL.
pub(crate) async fn wait_with_escalation(
    child: &mut Child,
    grace: Duration,
    sigkill_grace: Duration,
) -> io::Result<std::process::ExitStatus> {
    if let Ok(result) = timeout(grace, child.wait()).await {
        return result;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        tracing::debug!(pid, "Worker outlived quit grace, sending SIGTERM");
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        if let Ok(result) = timeout(sigkill_grace, child.wait()).await {
            return result;
        }
    }

    tracing::warn!("Worker unresponsive, sending SIGKILL");
    child.start_kill()?;
    child.wait().await
}
