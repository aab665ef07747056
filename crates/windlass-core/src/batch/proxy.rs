use std::sync::Arc;

use crate::batch::BatchTracker;
use crate::models::{JobStatus, PoolError};
use crate::pool::CancelToken;

/// Per-batch hooks supplied by the caller. `task_error` returns whether the
/// failed item will be retried externally; a retry leaves the batch size
/// untouched and defers the slot's accounting until the retry's own
/// completion arrives.
pub trait BatchCallback<T>: Send + Sync {
    fn task_success(&self, item: &T);
    fn task_error(&self, item: &T, error: &PoolError) -> bool;
    fn job_completed(&self, error: Option<PoolError>);
    fn job_cancelled(&self);
}

/// Arbiter that drives a [`BatchTracker`] to exactly one terminal outcome
/// despite submissions and completions racing on different tasks.
///
/// However many of count-reached, explicit error, explicit cancellation and
/// disposal fire concurrently, only the first transition's hook runs — and
/// it runs on a freshly spawned task, never synchronously inside the
/// triggering call.
pub struct CompletionProxy<T: 'static> {
    inner: Arc<ProxyInner<T>>,
}

impl<T: 'static> Clone for CompletionProxy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ProxyInner<T: 'static> {
    tracker: Arc<BatchTracker>,
    callback: Arc<dyn BatchCallback<T>>,
}

impl<T: 'static> CompletionProxy<T> {
    pub fn new(callback: Arc<dyn BatchCallback<T>>) -> Self {
        Self::with_tracker(Arc::new(BatchTracker::new()), callback)
    }

    pub fn with_tracker(tracker: Arc<BatchTracker>, callback: Arc<dyn BatchCallback<T>>) -> Self {
        Self {
            inner: Arc::new(ProxyInner { tracker, callback }),
        }
    }

    pub fn tracker(&self) -> Arc<BatchTracker> {
        Arc::clone(&self.inner.tracker)
    }

    /// Grows (and optionally closes) the batch, then re-checks completion:
    /// closing may be the last precondition to fall into place.
    pub fn update_batch_size(&self, delta: u64, complete: bool) -> u64 {
        let size = self.inner.tracker.update_batch_size(delta, complete);
        if self.inner.tracker.all_accounted() {
            self.finish(None);
        }
        size
    }

    /// Reports one submitted item's outcome. Arrives exactly once per slot;
    /// a retried item reports again through the same slot when its retry
    /// concludes.
    pub fn task_completed(&self, item: &T, error: Option<PoolError>) {
        match error {
            None => {
                self.inner.callback.task_success(item);
                self.inner.tracker.record_processed();
                if self.inner.tracker.all_accounted() {
                    self.finish(None);
                }
            }
            Some(error) => {
                let resolved = error.resolve();
                if resolved.is_cancelled() {
                    self.cancel();
                } else {
                    let retry = self.inner.callback.task_error(item, &resolved);
                    if !retry {
                        self.finish(Some(resolved));
                    }
                }
            }
        }
    }

    /// Triggers overall cancellation; a no-op once the batch is terminal.
    pub fn cancel(&self) {
        if self.inner.tracker.try_finish(JobStatus::Cancelled, None) {
            let callback = Arc::clone(&self.inner.callback);
            tokio::spawn(async move {
                callback.job_cancelled();
            });
        }
    }

    /// Forces a cancelled outcome when the batch is still running.
    pub fn dispose(&self) {
        if self.inner.tracker.status() == JobStatus::Running {
            self.cancel();
        }
    }

    /// Cancels the batch when the given signal fires.
    pub fn propagate_cancel(&self, token: CancelToken) {
        let proxy = self.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            proxy.cancel();
        });
    }

    fn finish(&self, error: Option<PoolError>) {
        let status = if error.is_some() {
            JobStatus::Error
        } else {
            JobStatus::Success
        };
        if self.inner.tracker.try_finish(status, error.clone()) {
            let callback = Arc::clone(&self.inner.callback);
            tokio::spawn(async move {
                callback.job_completed(error);
            });
        }
    }
}
