use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::models::PoolError;
use crate::pool::{CancelToken, PoolResult};

/// Bounded admission gate for secondary reads against the external source.
///
/// Grants are immediate while the holder count is under the limit; beyond
/// that, requesters queue FIFO and are resumed by a released permit without
/// occupying a thread. The primary reader never goes through the gate.
#[derive(Clone)]
pub struct ReadThrottle {
    inner: Arc<ThrottleInner>,
}

#[derive(Debug)]
struct ThrottleInner {
    limit: usize,
    state: Mutex<ThrottleState>,
}

#[derive(Debug, Default)]
struct ThrottleState {
    holders: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
    closed: bool,
}

/// An admission slot. Dropping it hands the slot to the oldest waiter, or
/// frees it when nobody is queued.
#[derive(Debug)]
pub struct ThrottlePermit {
    inner: Arc<ThrottleInner>,
}

impl ReadThrottle {
    /// Sizes the gate from the pool-wide parallel read limit, which counts
    /// the primary reader; the gate admits the rest, never fewer than one.
    pub fn for_parallel_limit(parallel_read_limit: usize) -> Self {
        Self::new(parallel_read_limit.saturating_sub(1))
    }

    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(ThrottleInner {
                limit: limit.max(1),
                state: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn holders(&self) -> usize {
        lock(&self.inner.state).holders
    }

    pub fn try_acquire(&self) -> Option<ThrottlePermit> {
        let mut state = lock(&self.inner.state);
        if state.closed || state.holders >= self.inner.limit {
            return None;
        }
        state.holders += 1;
        Some(ThrottlePermit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Acquires a slot, queuing behind earlier requesters when the gate is
    /// full. Resolves with a cancellation error if the token fires or the
    /// gate closes while waiting.
    pub async fn acquire(&self, cancel: &CancelToken) -> PoolResult<ThrottlePermit> {
        let mut receiver = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(gate_closed());
            }
            if state.holders < self.inner.limit {
                state.holders += 1;
                return Ok(ThrottlePermit {
                    inner: Arc::clone(&self.inner),
                });
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        tokio::select! {
            granted = &mut receiver => match granted {
                Ok(()) => Ok(ThrottlePermit {
                    inner: Arc::clone(&self.inner),
                }),
                Err(_) => Err(gate_closed()),
            },
            _ = cancel.cancelled() => {
                receiver.close();
                if receiver.try_recv().is_ok() {
                    // a released slot raced with cancellation; pass it on
                    drop(ThrottlePermit {
                        inner: Arc::clone(&self.inner),
                    });
                }
                Err(PoolError::cancelled("read throttle wait cancelled"))
            }
        }
    }

    /// Resolves every queued waiter with a cancelled outcome and refuses new
    /// admissions until [`open`](Self::open) is called. Outstanding permits
    /// drain normally.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        state.closed = true;
        state.waiters.clear();
    }

    pub fn open(&self) {
        lock(&self.inner.state).closed = false;
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        let mut state = lock(&self.inner.state);
        loop {
            let Some(waiter) = state.waiters.pop_front() else {
                state.holders = state.holders.saturating_sub(1);
                return;
            };
            // hand the slot straight over; a waiter that already gave up is
            // skipped in favor of the next one
            if waiter.send(()).is_ok() {
                return;
            }
        }
    }
}

fn gate_closed() -> PoolError {
    PoolError::cancelled("read throttle closed")
}

fn lock(state: &Mutex<ThrottleState>) -> MutexGuard<'_, ThrottleState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
