//! Cancellable deferred execution.
//!
//! One scheduling primitive serves both per-request timeout expiry and
//! restart backoff delays.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A callback scheduled to run once after a delay.
///
/// Cancellation is explicit: dropping a `Deferred` does NOT cancel it, so a
/// callback may safely run while something else still holds (and later
/// drops) its handle.
#[derive(Debug)]
pub(crate) struct Deferred {
    handle: JoinHandle<()>,
}

impl Deferred {
    pub fn after<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        Self { handle }
    }

    /// Cancel the callback if it has not started running yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}
