//! Restart supervision: decides whether a worker exit warrants an automatic
//! restart and how long to wait before attempting it.

use std::time::Duration;

use crate::timer::Deferred;

/// What a worker exit means for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitDisposition {
    /// A `stop()` call caused this exit.
    Intentional,
    /// The worker shut itself down with the designated clean exit code.
    Clean,
    /// Anything else.
    Crash,
}

pub(crate) fn classify_exit(
    intentional_stop: bool,
    code: Option<i32>,
    clean_exit_code: i32,
) -> ExitDisposition {
    if intentional_stop {
        ExitDisposition::Intentional
    } else if code == Some(clean_exit_code) {
        ExitDisposition::Clean
    } else {
        ExitDisposition::Crash
    }
}

/// Linear backoff, bounded by an attempt count.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RestartPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RestartPolicy {
    /// Delay before restart attempt `attempt` (1-based), or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.backoff_unit * attempt)
    }
}

/// Supervisor-owned mutable state. Lives inside the daemon's control lock;
/// nothing else writes these fields.
#[derive(Debug, Default)]
pub(crate) struct SupervisorState {
    /// Set by `stop()`; suppresses auto-restart for the exit it causes.
    /// Cleared when a worker instance reaches `Ready`.
    pub intentional_stop: bool,
    /// Consecutive crashes without an intervening `Ready`.
    pub restart_attempts: u32,
    /// Handle to a scheduled restart, if one is pending.
    pub pending_restart: Option<Deferred>,
}

impl SupervisorState {
    pub fn cancel_pending_restart(&mut self) {
        if let Some(deferred) = self.pending_restart.take() {
            deferred.cancel();
        }
    }

    /// A worker instance reached `Ready`: the failure sequence is over.
    pub fn on_ready(&mut self) {
        self.restart_attempts = 0;
        self.intentional_stop = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intentional_stop_wins_over_exit_code() {
        assert_eq!(classify_exit(true, Some(1), 0), ExitDisposition::Intentional);
        assert_eq!(classify_exit(true, Some(0), 0), ExitDisposition::Intentional);
    }

    #[test]
    fn clean_code_is_not_a_crash() {
        assert_eq!(classify_exit(false, Some(0), 0), ExitDisposition::Clean);
        assert_eq!(classify_exit(false, Some(2), 2), ExitDisposition::Clean);
    }

    #[test]
    fn everything_else_is_a_crash() {
        assert_eq!(classify_exit(false, Some(1), 0), ExitDisposition::Crash);
        // Killed by signal: no exit code.
        assert_eq!(classify_exit(false, None, 0), ExitDisposition::Crash);
    }

    #[test]
    fn backoff_is_linear_and_bounded() {
        let policy = RestartPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        };
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_delay(4), None);
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn on_ready_resets_failure_sequence() {
        let mut state = SupervisorState {
            intentional_stop: true,
            restart_attempts: 2,
            pending_restart: None,
        };
        state.on_ready();
        assert!(!state.intentional_stop);
        assert_eq!(state.restart_attempts, 0);
    }
}
