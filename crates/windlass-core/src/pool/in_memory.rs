use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use crate::models::{PoolError, TaskId};
use crate::pool::{
    BoxFuture, CancelToken, DispatchOutcome, Dispatcher, ItemReader, MessageSource, PoolResult,
    ReadMode, ReaderFactory,
};

/// Reference in-memory message source. Blocking reads park on a notify and
/// wake on arrival, bounded by the caller's timeout and the cancellation
/// signal; immediate reads never wait.
pub struct InMemoryQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for InMemoryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    arrival: Notify,
}

impl<T> InMemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                arrival: Notify::new(),
            }),
        }
    }

    pub fn push(&self, item: T) {
        lock(&self.inner.items).push_back(item);
        self.inner.arrival.notify_waiters();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.items).is_empty()
    }

    fn pop(&self) -> Option<T> {
        lock(&self.inner.items).pop_front()
    }
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> MessageSource<T> for InMemoryQueue<T> {
    fn receive<'a>(
        &'a self,
        mode: ReadMode,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<Option<T>>> {
        Box::pin(async move {
            match mode {
                ReadMode::Immediate => {
                    if cancel.is_cancelled() {
                        return Err(PoolError::cancelled("queue read cancelled"));
                    }
                    Ok(self.pop())
                }
                ReadMode::Blocking { timeout } => {
                    let deadline = Instant::now() + timeout;
                    loop {
                        let notified = self.inner.arrival.notified();
                        if cancel.is_cancelled() {
                            return Err(PoolError::cancelled("queue read cancelled"));
                        }
                        if let Some(item) = self.pop() {
                            return Ok(Some(item));
                        }
                        tokio::select! {
                            _ = notified => {}
                            _ = sleep_until(deadline) => return Ok(None),
                            _ = cancel.cancelled() => {
                                return Err(PoolError::cancelled("queue read cancelled"));
                            }
                        }
                    }
                }
            }
        })
    }

    fn push_back(&self, item: T) -> BoxFuture<'_, PoolResult<()>> {
        Box::pin(async move {
            self.push(item);
            Ok(())
        })
    }
}

/// Reader composing an external [`MessageSource`] with a [`Dispatcher`]; one
/// instance per worker slot.
pub struct SourceReader<T> {
    task_id: TaskId,
    source: Arc<dyn MessageSource<T>>,
    dispatcher: Arc<dyn Dispatcher<T>>,
}

impl<T: Send + 'static> ItemReader<T> for SourceReader<T> {
    fn read<'a>(
        &'a mut self,
        mode: ReadMode,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<Option<T>>> {
        self.source.receive(mode, cancel)
    }

    fn dispatch<'a>(
        &'a mut self,
        item: &'a T,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<DispatchOutcome>> {
        self.dispatcher.dispatch(item, self.task_id, cancel)
    }

    fn requeue(&mut self, item: T) -> BoxFuture<'_, PoolResult<()>> {
        self.source.push_back(item)
    }

    fn on_item_error(&mut self, _item: &T, error: &PoolError) {
        tracing::error!(
            task_id = self.task_id.0,
            kind = ?error.kind,
            message = %error.message,
            "item dispatch failed"
        );
    }
}

pub struct SourceReaderFactory<T> {
    source: Arc<dyn MessageSource<T>>,
    dispatcher: Arc<dyn Dispatcher<T>>,
}

impl<T> SourceReaderFactory<T> {
    pub fn new(source: Arc<dyn MessageSource<T>>, dispatcher: Arc<dyn Dispatcher<T>>) -> Self {
        Self { source, dispatcher }
    }
}

impl<T: Send + 'static> ReaderFactory<T> for SourceReaderFactory<T> {
    fn create(&self, task_id: TaskId) -> PoolResult<Box<dyn ItemReader<T>>> {
        Ok(Box::new(SourceReader {
            task_id,
            source: Arc::clone(&self.source),
            dispatcher: Arc::clone(&self.dispatcher),
        }))
    }
}

fn lock<T>(items: &Mutex<VecDeque<T>>) -> MutexGuard<'_, VecDeque<T>> {
    items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
