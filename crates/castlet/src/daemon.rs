//! The daemon manager: one long-lived worker process, one correlator, one
//! supervisor.
//!
//! Flow per request: facade → [`CastDaemon::send`] → correlator (assign id,
//! register pending, write frame) → worker → frame reader → correlator
//! (match, resolve). The frame reader and exit watcher run as background
//! tasks for as long as the worker instance lives; every background task is
//! tagged with the spawn generation (`instance`) so a stale task can never
//! touch a newer worker's state.

use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonLineCodec;
use crate::bridge::protocol::{Payload, RequestFrame, ResponseFrame, WorkerCommand};
use crate::config::DaemonConfig;
use crate::correlator::Correlator;
use crate::error::DaemonError;
use crate::health::{DaemonSnapshot, WorkerExitInfo, WorkerState};
use crate::supervisor::{ExitDisposition, RestartPolicy, SupervisorState, classify_exit};
use crate::timer::Deferred;
use crate::worker::{SpawnedWorker, forward_stderr, spawn_worker, wait_with_escalation};

type FrameWriter = FramedWrite<ChildStdin, JsonLineCodec<RequestFrame>>;

/// Owner of the worker process and the RPC channel to it.
///
/// One instance per application run. All methods take `&self`; the daemon is
/// intended to sit in an `Arc` and be shared across tasks.
pub struct CastDaemon {
    shared: Arc<Shared>,
}

struct Shared {
    config: DaemonConfig,
    state_tx: watch::Sender<WorkerState>,
    correlator: Correlator,
    writer: AsyncMutex<Option<FrameWriter>>,
    control: StdMutex<Control>,
}

/// Supervisor-owned mutable state, guarded by one lock. Never held across
/// an await.
struct Control {
    /// Spawn generation. Incremented on every spawn attempt.
    instance: u64,
    supervisor: SupervisorState,
    /// Channel to the current instance's exit watcher: sending asks it to
    /// force-terminate after the given grace period.
    terminate_tx: Option<oneshot::Sender<Duration>>,
    last_exit: Option<WorkerExitInfo>,
}

impl CastDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::NotStarted);
        Self {
            shared: Arc::new(Shared {
                config,
                state_tx,
                correlator: Correlator::new(),
                writer: AsyncMutex::new(None),
                control: StdMutex::new(Control {
                    instance: 0,
                    supervisor: SupervisorState::default(),
                    terminate_tx: None,
                    last_exit: None,
                }),
            }),
        }
    }

    /// Start the worker. Idempotent: while an instance is `Starting` or
    /// `Ready`, further calls share the same readiness outcome and no second
    /// process is spawned.
    pub async fn start(&self) -> Result<(), DaemonError> {
        self.shared.start().await
    }

    /// Stop the worker: set the intentional-shutdown flag, ask it to `quit`,
    /// and force-terminate after a bounded grace period if it lingers.
    /// Also cancels a scheduled crash-restart, if any.
    pub async fn stop(&self) -> Result<(), DaemonError> {
        self.shared.stop().await
    }

    /// Issue one correlated request with its own timeout budget.
    ///
    /// Fails immediately with [`DaemonError::NotRunning`] unless the worker
    /// is `Ready` — this call never starts the worker.
    pub async fn send(
        &self,
        command: WorkerCommand,
        timeout: Duration,
    ) -> Result<Payload, DaemonError> {
        self.shared.call(command, timeout).await
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn snapshot(&self) -> DaemonSnapshot {
        let control = self.shared.control();
        DaemonSnapshot {
            state: *self.shared.state_tx.borrow(),
            restart_attempts: control.supervisor.restart_attempts,
            last_exit: control.last_exit.clone(),
        }
    }
}

enum StartAction {
    AlreadyReady,
    /// Another caller is mid-start; share its outcome.
    Wait,
    /// A stop is in flight; let it finish, then try again.
    WaitForStop,
    Spawn(u64),
}

impl Shared {
    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Returns a boxed, type-erased future instead of an `async fn` so that
    // start()'s Send-ness never has to be inferred through the opaque type of
    // the start -> attach -> watch_exit -> handle_exit -> start recursion
    // cycle (which rustc cannot resolve within the defining scope).
    fn start(
        self: &Arc<Self>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), DaemonError>> + Send + '_>,
    > {
        Box::pin(async move {
        loop {
            let mut state_rx = self.state_tx.subscribe();
            let action = {
                let mut control = self.control();
                // Copy the state out: send_replace below must not run while
                // a watch read guard is alive.
                let state = *self.state_tx.borrow();
                match state {
                    WorkerState::Ready => StartAction::AlreadyReady,
                    WorkerState::Starting => StartAction::Wait,
                    WorkerState::Stopping => StartAction::WaitForStop,
                    WorkerState::NotStarted | WorkerState::Exited => {
                        // A manual start supersedes any scheduled restart.
                        control.supervisor.cancel_pending_restart();
                        control.instance += 1;
                        self.state_tx.send_replace(WorkerState::Starting);
                        StartAction::Spawn(control.instance)
                    }
                }
            };

            match action {
                StartAction::AlreadyReady => return Ok(()),
                StartAction::Wait => return self.await_readiness(&mut state_rx).await,
                StartAction::WaitForStop => {
                    let stopped = state_rx
                        .wait_for(|s| matches!(s, WorkerState::Exited | WorkerState::NotStarted))
                        .await;
                    if stopped.is_err() {
                        return Err(state_channel_closed());
                    }
                }
                StartAction::Spawn(instance) => {
                    let worker = match spawn_worker(self.config.spawner.as_ref()) {
                        Ok(worker) => worker,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to spawn worker");
                            let _guard = self.control();
                            self.state_tx.send_replace(WorkerState::NotStarted);
                            return Err(e);
                        }
                    };
                    self.attach(instance, worker).await;
                    return self.await_readiness(&mut state_rx).await;
                }
            }
        }
        })
    }

    async fn await_readiness(
        &self,
        state_rx: &mut watch::Receiver<WorkerState>,
    ) -> Result<(), DaemonError> {
        match state_rx
            .wait_for(|s| !matches!(s, WorkerState::Starting))
            .await
        {
            Ok(state) if *state == WorkerState::Ready => Ok(()),
            Ok(_) => Err(DaemonError::Spawn(io::Error::other(
                "worker exited during startup",
            ))),
            Err(_) => Err(state_channel_closed()),
        }
    }

    /// Wire up a freshly spawned worker: writer, stderr forwarder, frame
    /// reader, exit watcher, readiness grace timer.
    async fn attach(self: &Arc<Self>, instance: u64, worker: SpawnedWorker) {
        let SpawnedWorker {
            child,
            pid,
            stdin,
            stdout,
            stderr,
        } = worker;
        tracing::info!(instance, pid, "Worker spawned");

        *self.writer.lock().await = Some(FramedWrite::new(stdin, JsonLineCodec::new()));
        forward_stderr(stderr);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            read_frames(shared, instance, stdout).await;
        });

        let (terminate_tx, terminate_rx) = oneshot::channel();
        {
            let mut control = self.control();
            // A stop() may have raced ahead of us; hand the grace budget to
            // the watcher directly instead of parking a sender nobody will
            // ever take.
            let state = *self.state_tx.borrow();
            if state == WorkerState::Stopping {
                let _ = terminate_tx.send(self.config.stop_grace);
            } else {
                control.terminate_tx = Some(terminate_tx);
            }
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            watch_exit(shared, instance, child, terminate_rx).await;
        });

        // Readiness is a grace period, not a handshake. Generation-checked:
        // if the worker crashed during the grace window, the timer finds a
        // different state and does nothing.
        let shared = Arc::clone(self);
        Deferred::after(self.config.ready_grace, async move {
            shared.mark_ready(instance);
        });
    }

    fn mark_ready(&self, instance: u64) {
        let mut control = self.control();
        let state = *self.state_tx.borrow();
        if control.instance != instance || state != WorkerState::Starting {
            return;
        }
        control.supervisor.on_ready();
        self.state_tx.send_replace(WorkerState::Ready);
        tracing::info!(instance, "Worker ready");
    }

    async fn call(&self, command: WorkerCommand, timeout: Duration) -> Result<Payload, DaemonError> {
        if *self.state_tx.borrow() != WorkerState::Ready {
            return Err(DaemonError::NotRunning);
        }

        let (id, response_rx) = self.correlator.register(timeout);
        let cmd = command.name();
        let frame = RequestFrame {
            command,
            request_id: id,
        };
        tracing::debug!(request_id = id, cmd, "Sending request");

        {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => {
                    if let Err(e) = writer.send(frame).await {
                        tracing::error!(request_id = id, cmd, error = %e, "Failed to write request frame");
                        self.correlator.abandon(id);
                        return Err(DaemonError::WorkerExited);
                    }
                }
                None => {
                    self.correlator.abandon(id);
                    return Err(DaemonError::NotRunning);
                }
            }
        }

        match response_rx.await {
            Ok(result) => result,
            // Pending entry dropped without completion; treat as exit.
            Err(_) => Err(DaemonError::WorkerExited),
        }
    }

    async fn stop(self: &Arc<Self>) -> Result<(), DaemonError> {
        let state = *self.state_tx.borrow();
        match state {
            WorkerState::NotStarted => return Ok(()),
            WorkerState::Exited => {
                let mut control = self.control();
                control.supervisor.cancel_pending_restart();
                control.supervisor.intentional_stop = true;
                return Ok(());
            }
            WorkerState::Stopping => return self.await_stopped().await,
            WorkerState::Starting | WorkerState::Ready => {}
        }

        {
            let mut control = self.control();
            control.supervisor.intentional_stop = true;
            control.supervisor.cancel_pending_restart();
        }

        // Ask politely first: a correlated quit while the worker can still
        // answer. Its outcome does not change what happens next.
        if state == WorkerState::Ready {
            match self.call(WorkerCommand::Quit, self.config.quit_timeout).await {
                Ok(_) => tracing::debug!("Worker acknowledged quit"),
                Err(e) => tracing::debug!(error = %e, "Quit request did not complete"),
            }
        }

        {
            // Under the control lock: handle_exit may be setting Exited
            // concurrently, and Stopping must not overwrite it.
            let _guard = self.control();
            let current = *self.state_tx.borrow();
            if current.is_running() {
                self.state_tx.send_replace(WorkerState::Stopping);
            }
        }

        let terminate_tx = self.control().terminate_tx.take();
        if let Some(tx) = terminate_tx {
            let _ = tx.send(self.config.stop_grace);
        }

        self.await_stopped().await
    }

    async fn await_stopped(&self) -> Result<(), DaemonError> {
        let mut state_rx = self.state_tx.subscribe();
        match state_rx
            .wait_for(|s| matches!(s, WorkerState::Exited | WorkerState::NotStarted))
            .await
        {
            Ok(_) => Ok(()),
            Err(_) => Err(state_channel_closed()),
        }
    }

    /// Worker is gone. Reject all in-flight requests, record the exit, and
    /// let the supervisor decide whether to restart. The table is fully
    /// drained before any restart can be scheduled.
    async fn handle_exit(self: &Arc<Self>, instance: u64, status: Option<ExitStatus>) {
        if self.control().instance != instance {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }
        let rejected = self.correlator.drain();
        if rejected > 0 {
            tracing::warn!(rejected, "Rejected in-flight requests after worker exit");
        }

        let restart = {
            let mut control = self.control();
            control.terminate_tx = None;

            let intentional = control.supervisor.intentional_stop;
            let info = match status {
                Some(status) => WorkerExitInfo::from_status(status, intentional),
                None => WorkerExitInfo {
                    exited_at: chrono::Utc::now().to_rfc3339(),
                    code: None,
                    signal: None,
                    intentional,
                },
            };
            tracing::info!(
                instance,
                code = ?info.code,
                signal = ?info.signal,
                intentional,
                "Worker exited"
            );

            let disposition = classify_exit(intentional, info.code, self.config.clean_exit_code);
            control.last_exit = Some(info);
            self.state_tx.send_replace(WorkerState::Exited);

            match disposition {
                ExitDisposition::Intentional | ExitDisposition::Clean => None,
                ExitDisposition::Crash => {
                    control.supervisor.restart_attempts += 1;
                    let attempt = control.supervisor.restart_attempts;
                    let policy = RestartPolicy {
                        max_attempts: self.config.max_restart_attempts,
                        backoff_unit: self.config.restart_backoff_unit,
                    };
                    match policy.next_delay(attempt) {
                        Some(delay) => Some((attempt, delay)),
                        None => {
                            tracing::error!(
                                attempt,
                                "Worker restart attempts exhausted, staying down"
                            );
                            None
                        }
                    }
                }
            }
        };

        if let Some((attempt, delay)) = restart {
            tracing::warn!(attempt, ?delay, "Scheduling worker restart");
            let shared = Arc::clone(self);
            let deferred = Deferred::after(delay, async move {
                // Release our own handle first so start() cannot cancel the
                // task it is running on.
                shared.control().supervisor.pending_restart = None;
                tracing::info!(attempt, "Attempting worker restart");
                if let Err(e) = shared.start().await {
                    tracing::error!(attempt, error = %e, "Worker restart failed");
                }
            });
            self.control().supervisor.pending_restart = Some(deferred);
        }
    }
}

fn state_channel_closed() -> DaemonError {
    DaemonError::Protocol("daemon state channel closed".to_string())
}

async fn read_frames(shared: Arc<Shared>, instance: u64, stdout: ChildStdout) {
    let mut reader = FramedRead::new(stdout, JsonLineCodec::<ResponseFrame>::new());
    while let Some(next) = reader.next().await {
        match next {
            Ok(frame) => {
                // A reader outliving its worker instance must not touch the table.
                if shared.control().instance != instance {
                    break;
                }
                shared.correlator.dispatch(frame);
            }
            Err(e) => {
                tracing::error!(instance, error = %e, "Frame reader I/O error");
                break;
            }
        }
    }
    tracing::debug!(instance, "Frame reader exiting");
}

async fn watch_exit(
    shared: Arc<Shared>,
    instance: u64,
    mut child: Child,
    mut terminate_rx: oneshot::Receiver<Duration>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        grace = &mut terminate_rx => {
            let grace = grace.unwrap_or_default();
            wait_with_escalation(&mut child, grace, shared.config.sigkill_grace).await
        }
    };

    match status {
        Ok(status) => shared.handle_exit(instance, Some(status)).await,
        Err(e) => {
            tracing::error!(instance, error = %e, "Failed to observe worker exit");
            shared.handle_exit(instance, None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSpawner {
        attempts: AtomicUsize,
    }

    impl crate::worker::WorkerSpawner for FailingSpawner {
        fn spawn(&self) -> io::Result<Child> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::NotFound, "no worker here"))
        }
    }

    fn failing_daemon() -> (CastDaemon, Arc<FailingSpawner>) {
        let spawner = Arc::new(FailingSpawner {
            attempts: AtomicUsize::new(0),
        });
        let daemon = CastDaemon::new(DaemonConfig::new(
            Arc::clone(&spawner) as Arc<dyn crate::worker::WorkerSpawner>
        ));
        (daemon, spawner)
    }

    #[tokio::test]
    async fn send_never_auto_starts() {
        let (daemon, spawner) = failing_daemon();

        let result = daemon
            .send(WorkerCommand::Status, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DaemonError::NotRunning)));
        assert_eq!(spawner.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(daemon.state(), WorkerState::NotStarted);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_daemon_not_started() {
        let (daemon, spawner) = failing_daemon();

        let result = daemon.start().await;
        assert!(matches!(result, Err(DaemonError::Spawn(_))));
        assert_eq!(spawner.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.state(), WorkerState::NotStarted);
        assert!(!daemon.is_running());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let (daemon, spawner) = failing_daemon();

        daemon.stop().await.unwrap();
        assert_eq!(daemon.state(), WorkerState::NotStarted);
        assert_eq!(spawner.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_initial_state() {
        let (daemon, _spawner) = failing_daemon();

        let snapshot = daemon.snapshot();
        assert_eq!(snapshot.state, WorkerState::NotStarted);
        assert_eq!(snapshot.restart_attempts, 0);
        assert!(snapshot.last_exit.is_none());
    }
}
