use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::models::{BatchInfo, BatchOutcome, JobStatus, PoolError};

/// Tracks an open-ended, closable count of submitted items and a single
/// terminal outcome for the whole batch.
///
/// Producers grow the size until they close submissions; consumers bump the
/// processed count as items finish. Either side may be the one to satisfy
/// the last completion precondition, so both re-check on every update. The
/// terminal cell is first-writer-wins: later triggers are no-ops.
pub struct BatchTracker {
    batch: Mutex<BatchState>,
    closed: Notify,
    processed: AtomicU64,
    terminal: Mutex<Option<(JobStatus, Option<PoolError>)>>,
    done: Notify,
}

#[derive(Debug, Default)]
struct BatchState {
    size: u64,
    complete: bool,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self {
            batch: Mutex::new(BatchState::default()),
            closed: Notify::new(),
            processed: AtomicU64::new(0),
            terminal: Mutex::new(None),
            done: Notify::new(),
        }
    }

    /// The only way the batch size and complete flag change. Adds `delta`
    /// to the running size and optionally closes submissions; calls after
    /// completion leave the size untouched. Returns the current size.
    pub fn update_batch_size(&self, delta: u64, complete: bool) -> u64 {
        let size = {
            let mut state = lock(&self.batch);
            if !state.complete {
                state.size += delta;
                if complete {
                    state.complete = true;
                }
            }
            state.size
        };
        if complete {
            self.closed.notify_waiters();
        }
        size
    }

    pub fn batch_info(&self) -> BatchInfo {
        let state = lock(&self.batch);
        BatchInfo {
            size: state.size,
            is_complete: state.complete,
        }
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        lock(&self.terminal)
            .as_ref()
            .map(|(status, _)| *status)
            .unwrap_or(JobStatus::Running)
    }

    /// Resolves once submissions are closed.
    pub async fn submissions_closed(&self) {
        loop {
            let notified = self.closed.notified();
            if lock(&self.batch).complete {
                return;
            }
            notified.await;
        }
    }

    /// Resolves with the batch's terminal outcome.
    pub async fn outcome(&self) -> BatchOutcome {
        loop {
            let notified = self.done.notified();
            if let Some((status, error)) = lock(&self.terminal).clone() {
                return BatchOutcome { status, error };
            }
            notified.await;
        }
    }

    pub(crate) fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True once submissions are closed and every submitted item has been
    /// accounted for.
    pub(crate) fn all_accounted(&self) -> bool {
        let state = lock(&self.batch);
        state.complete && self.processed.load(Ordering::SeqCst) >= state.size
    }

    /// First writer wins; returns whether this call performed the
    /// transition out of `Running`.
    pub(crate) fn try_finish(&self, status: JobStatus, error: Option<PoolError>) -> bool {
        debug_assert!(status != JobStatus::Running);
        {
            let mut terminal = lock(&self.terminal);
            if terminal.is_some() {
                return false;
            }
            *terminal = Some((status, error));
        }
        self.done.notify_waiters();
        true
    }
}

impl Default for BatchTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::BatchTracker;
    use crate::models::JobStatus;

    #[test]
    fn size_grows_until_complete_then_freezes() {
        let tracker = BatchTracker::new();
        assert_eq!(tracker.update_batch_size(5, false), 5);
        assert_eq!(tracker.update_batch_size(3, true), 8);
        assert_eq!(tracker.update_batch_size(4, false), 8);
        let info = tracker.batch_info();
        assert_eq!(info.size, 8);
        assert!(info.is_complete);
    }

    #[test]
    fn first_finish_wins() {
        let tracker = BatchTracker::new();
        assert_eq!(tracker.status(), JobStatus::Running);
        assert!(tracker.try_finish(JobStatus::Success, None));
        assert!(!tracker.try_finish(JobStatus::Cancelled, None));
        assert_eq!(tracker.status(), JobStatus::Success);
    }
}
