//! Request correlation: matches incoming response frames to outstanding
//! callers.
//!
//! Ids are monotonic and never reused. The table is ordered by id, which is
//! insertion order, so FIFO fallback (a response without a `requestId`) is
//! simply "oldest live entry".

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::bridge::protocol::{Payload, ResponseFrame};
use crate::error::DaemonError;
use crate::timer::Deferred;

pub(crate) type CallResult = Result<Payload, DaemonError>;

struct Pending {
    tx: oneshot::Sender<CallResult>,
    timer: Option<Deferred>,
}

impl Pending {
    fn complete(self, result: CallResult) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
        // The caller may have dropped its future; the entry is gone either way.
        let _ = self.tx.send(result);
    }
}

/// Pending request table plus id allocation. Cheap to clone; all clones
/// share one table.
#[derive(Clone)]
pub(crate) struct Correlator {
    inner: Arc<Inner>,
}

struct Inner {
    table: Mutex<BTreeMap<u64, Pending>>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Pending>> {
        self.inner.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id, insert a pending entry, and arm its timeout. The
    /// entry leaves the table through exactly one of: a matching response,
    /// timeout expiry, an explicit [`abandon`](Self::abandon), or a drain.
    pub fn register(&self, timeout: Duration) -> (u64, oneshot::Receiver<CallResult>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.table().insert(id, Pending { tx, timer: None });

        let this = self.clone();
        let timer = Deferred::after(timeout, async move {
            this.expire(id, timeout);
        });
        match self.table().get_mut(&id) {
            Some(pending) => pending.timer = Some(timer),
            // Resolved before the timer was armed.
            None => timer.cancel(),
        }

        (id, rx)
    }

    fn expire(&self, id: u64, timeout: Duration) {
        if let Some(pending) = self.table().remove(&id) {
            tracing::debug!(request_id = id, ?timeout, "Request timed out");
            pending.complete(Err(DaemonError::Timeout(timeout)));
        }
    }

    /// Drop an entry whose request frame never made it to the worker.
    pub fn abandon(&self, id: u64) {
        if let Some(pending) = self.table().remove(&id)
            && let Some(timer) = &pending.timer
        {
            timer.cancel();
        }
    }

    /// Route one incoming frame.
    ///
    /// A frame with a `requestId` resolves that exact entry, out of order or
    /// not; an unknown id (typically a reply landing after its timeout) is
    /// dropped. A frame without a `requestId` resolves the oldest entry —
    /// legacy mode for workers that do not echo ids, only correct when the
    /// worker answers in order and callers keep a single request
    /// outstanding.
    pub fn dispatch(&self, frame: ResponseFrame) {
        let request_id = frame.request_id;
        let matched = {
            let mut table = self.table();
            match request_id {
                Some(id) => table.remove(&id).map(|p| (id, p)),
                None => table.pop_first(),
            }
        };

        match matched {
            Some((id, pending)) => {
                if request_id.is_none() {
                    tracing::debug!(request_id = id, "Resolving oldest entry for id-less response");
                }
                pending.complete(frame.into_result());
            }
            None => match request_id {
                Some(id) => {
                    tracing::warn!(request_id = id, "Response for unknown request id, dropping")
                }
                None => tracing::warn!("Id-less response with no pending requests, dropping"),
            },
        }
    }

    /// Reject every outstanding entry. Called when the worker exits, before
    /// any restart is scheduled.
    pub fn drain(&self) -> usize {
        let entries = std::mem::take(&mut *self.table());
        let count = entries.len();
        for (_, pending) in entries {
            pending.complete(Err(DaemonError::WorkerExited));
        }
        count
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.table().len()
    }
}
