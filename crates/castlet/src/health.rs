//! Lifecycle state types for the worker daemon.

use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Never started (or spawn failed).
    #[default]
    NotStarted,
    /// Spawned, waiting out the readiness grace period.
    Starting,
    /// Accepting requests.
    Ready,
    /// `stop()` in progress.
    Stopping,
    /// Process is gone. A restart may be scheduled (crash path) or the
    /// daemon may stay down (intentional stop, restarts exhausted).
    Exited,
}

impl WorkerState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

/// Record of the most recent worker exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerExitInfo {
    /// When the exit was observed (RFC 3339).
    pub exited_at: String,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any (unix).
    pub signal: Option<i32>,
    /// Whether a `stop()` call caused this exit.
    pub intentional: bool,
}

impl WorkerExitInfo {
    pub fn from_status(status: ExitStatus, intentional: bool) -> Self {
        Self {
            exited_at: chrono::Utc::now().to_rfc3339(),
            code: status.code(),
            signal: signal_of(&status),
            intentional,
        }
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Point-in-time view of the daemon, for status surfaces and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonSnapshot {
    pub state: WorkerState,
    pub restart_attempts: u32,
    pub last_exit: Option<WorkerExitInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_not_started() {
        assert_eq!(WorkerState::default(), WorkerState::NotStarted);
    }

    #[test]
    fn running_states() {
        assert!(WorkerState::Starting.is_running());
        assert!(WorkerState::Ready.is_running());
        assert!(!WorkerState::NotStarted.is_running());
        assert!(!WorkerState::Stopping.is_running());
        assert!(!WorkerState::Exited.is_running());
    }

    #[test]
    fn state_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(WorkerState::NotStarted).unwrap(),
            serde_json::json!("NOT_STARTED")
        );
        assert_eq!(
            serde_json::to_value(WorkerState::Ready).unwrap(),
            serde_json::json!("READY")
        );
    }

    #[cfg(unix)]
    #[test]
    fn exit_info_captures_code_and_signal() {
        use std::os::unix::process::ExitStatusExt;

        let clean = WorkerExitInfo::from_status(ExitStatus::from_raw(0), true);
        assert_eq!(clean.code, Some(0));
        assert_eq!(clean.signal, None);
        assert!(clean.intentional);

        let killed = WorkerExitInfo::from_status(ExitStatus::from_raw(9), false);
        assert_eq!(killed.code, None);
        assert_eq!(killed.signal, Some(9));
    }
}
