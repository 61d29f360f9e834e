//! Daemon configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::worker::{ExecSpawner, WorkerSpawner};

/// Configuration for a [`crate::CastDaemon`].
///
/// Defaults match the production helper: a short readiness grace after
/// spawn, a two-second quit grace before force-terminate, and up to three
/// crash restarts with linear backoff.
#[derive(Clone)]
pub struct DaemonConfig {
    pub spawner: Arc<dyn WorkerSpawner>,
    /// Delay after a successful spawn before the worker is declared ready.
    /// Readiness is timer-based, not handshake-based.
    pub ready_grace: Duration,
    /// How long `stop()` waits for the worker to exit on its own after the
    /// `quit` command before escalating.
    pub stop_grace: Duration,
    /// Budget for the correlated `quit` request itself.
    pub quit_timeout: Duration,
    /// How long after SIGTERM before SIGKILL.
    pub sigkill_grace: Duration,
    /// Consecutive crash restarts before the supervisor gives up.
    pub max_restart_attempts: u32,
    /// Restart delay is `attempt × restart_backoff_unit`.
    pub restart_backoff_unit: Duration,
    /// Exit code treated as a deliberate shutdown even without `stop()`.
    pub clean_exit_code: i32,
}

impl DaemonConfig {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            ready_grace: Duration::from_millis(500),
            stop_grace: Duration::from_secs(2),
            quit_timeout: Duration::from_secs(1),
            sigkill_grace: Duration::from_millis(500),
            max_restart_attempts: 3,
            restart_backoff_unit: Duration::from_secs(1),
            clean_exit_code: 0,
        }
    }

    /// Convenience constructor for the common case of a worker executable
    /// plus arguments.
    pub fn for_program(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::new(Arc::new(ExecSpawner::new(program, args)))
    }

    pub fn with_ready_grace(mut self, grace: Duration) -> Self {
        self.ready_grace = grace;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_quit_timeout(mut self, timeout: Duration) -> Self {
        self.quit_timeout = timeout;
        self
    }

    pub fn with_sigkill_grace(mut self, grace: Duration) -> Self {
        self.sigkill_grace = grace;
        self
    }

    pub fn with_max_restart_attempts(mut self, attempts: u32) -> Self {
        self.max_restart_attempts = attempts;
        self
    }

    pub fn with_restart_backoff_unit(mut self, unit: Duration) -> Self {
        self.restart_backoff_unit = unit;
        self
    }

    pub fn with_clean_exit_code(mut self, code: i32) -> Self {
        self.clean_exit_code = code;
        self
    }
}
