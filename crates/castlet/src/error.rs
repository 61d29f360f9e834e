//! Error taxonomy for the worker daemon.

use std::time::Duration;

/// Errors surfaced to callers of the daemon and the command facade.
///
/// Worker-reported command failures (`success: false` on the wire) propagate
/// as [`DaemonError::Command`] with the worker's message verbatim; they are
/// not protocol failures. Restart exhaustion is not an error variant — once
/// the supervisor gives up, callers simply keep seeing [`DaemonError::NotRunning`]
/// until a manual `start()`.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// `send()` was called while the worker is not in the `Ready` state.
    #[error("worker is not running")]
    NotRunning,

    /// The worker process could not be spawned.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// No matching response arrived within the request's budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The worker exited while the request was in flight.
    #[error("worker exited with request in flight")]
    WorkerExited,

    /// The worker answered the request with `success: false`.
    #[error("worker rejected command: {0}")]
    Command(String),

    /// A well-formed response that cannot be used (missing or mistyped
    /// payload field).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DaemonError {
    /// True for errors that mean the request never completed on the worker
    /// side as far as we know (as opposed to a definitive worker answer).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotRunning | Self::Spawn(_) | Self::Timeout(_) | Self::WorkerExited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_carry_worker_message() {
        let err = DaemonError::Command("no such speaker: kitchen".to_string());
        assert_eq!(err.to_string(), "worker rejected command: no such speaker: kitchen");
        assert!(!err.is_transport());
    }

    #[test]
    fn transport_classification() {
        assert!(DaemonError::NotRunning.is_transport());
        assert!(DaemonError::Timeout(Duration::from_secs(3)).is_transport());
        assert!(DaemonError::WorkerExited.is_transport());
        assert!(!DaemonError::Protocol("missing field".into()).is_transport());
    }
}
