use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use crate::error::RpcError;

/// Completion group for a fleet of in-flight asynchronous operations.
///
/// Every async dispatch attaches to a handle and detaches on completion;
/// [`Handle::wait`] blocks until the in-flight count reaches zero. The
/// first transport failure recorded on the handle fails the wait
/// immediately; operations already dispatched still run to completion but
/// are no longer awaited. Handles cannot be cancelled.
///
/// Cloning a handle clones the group token, not the group: all clones
/// share one counter. The transport carries the handle with each async
/// envelope, so an operation that issues further async operations against
/// the same handle extends the group (handles are not transitive across
/// distinct handles).
#[derive(Clone, Default)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    pending: AtomicU64,
    notify: Notify,
    failure: OnceLock<RpcError>,
}

impl Handle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more in-flight operation.
    #[inline]
    pub fn attach(&self) {
        self.attach_many(1);
    }

    /// Register `count` in-flight operations at once (per-bucket fan-out).
    pub fn attach_many(&self, count: u64) {
        if count > 0 {
            self.inner.pending.fetch_add(count, Ordering::AcqRel);
        }
    }

    /// Mark one in-flight operation as finished.
    pub fn complete(&self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }

    /// Record a failure and mark the operation finished. Only the first
    /// failure is kept; waiters observe it on their next poll.
    pub fn fail(&self, error: RpcError) {
        let _ = self.inner.failure.set(error);
        self.inner.notify.notify_waiters();
        self.complete();
    }

    pub fn in_flight(&self) -> u64 {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// The first failure recorded on this handle, if any. Non-blocking.
    pub fn failure(&self) -> Option<RpcError> {
        self.inner.failure.get().cloned()
    }

    /// Block until every operation attached to this handle has completed,
    /// or until a failure is recorded.
    pub async fn wait(&self) -> Result<(), RpcError> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking, or a wake between the check and
            // the await is lost.
            notified.as_mut().enable();
            if let Some(error) = self.inner.failure.get() {
                return Err(error.clone());
            }
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            notified.await;
        }
    }
}
