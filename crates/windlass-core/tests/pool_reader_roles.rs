use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use windlass_core::models::{PoolError, TaskId};
use windlass_core::pool::{
    BoxFuture, CancelToken, DispatchOutcome, ElasticPool, InMemoryQueue, ItemReader,
    MessageSource, PoolConfig, PoolResult, ReadMode, ReaderFactory,
};

#[derive(Default)]
struct ReadMetrics {
    blocking_reads: AtomicUsize,
    immediate_reads: AtomicUsize,
    concurrent_blocking: AtomicUsize,
    peak_blocking: AtomicUsize,
}

struct RecordingFactory {
    queue: InMemoryQueue<u32>,
    metrics: Arc<ReadMetrics>,
    dispatch_delay: Duration,
}

struct RecordingReader {
    queue: InMemoryQueue<u32>,
    metrics: Arc<ReadMetrics>,
    dispatch_delay: Duration,
}

impl ItemReader<u32> for RecordingReader {
    fn read<'a>(
        &'a mut self,
        mode: ReadMode,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<Option<u32>>> {
        Box::pin(async move {
            match mode {
                ReadMode::Blocking { .. } => {
                    self.metrics.blocking_reads.fetch_add(1, Ordering::SeqCst);
                    let now = self.metrics.concurrent_blocking.fetch_add(1, Ordering::SeqCst) + 1;
                    self.metrics.peak_blocking.fetch_max(now, Ordering::SeqCst);
                    let out = self.queue.receive(mode, cancel).await;
                    self.metrics.concurrent_blocking.fetch_sub(1, Ordering::SeqCst);
                    out
                }
                ReadMode::Immediate => {
                    self.metrics.immediate_reads.fetch_add(1, Ordering::SeqCst);
                    self.queue.receive(mode, cancel).await
                }
            }
        })
    }

    fn dispatch<'a>(
        &'a mut self,
        _item: &'a u32,
        _cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<DispatchOutcome>> {
        Box::pin(async move {
            tokio::time::sleep(self.dispatch_delay).await;
            Ok(DispatchOutcome::default())
        })
    }

    fn requeue(&mut self, item: u32) -> BoxFuture<'_, PoolResult<()>> {
        Box::pin(async move {
            self.queue.push(item);
            Ok(())
        })
    }

    fn on_item_error(&mut self, _item: &u32, _error: &PoolError) {}
}

impl ReaderFactory<u32> for RecordingFactory {
    fn create(&self, _task_id: TaskId) -> PoolResult<Box<dyn ItemReader<u32>>> {
        Ok(Box::new(RecordingReader {
            queue: self.queue.clone(),
            metrics: Arc::clone(&self.metrics),
            dispatch_delay: self.dispatch_delay,
        }))
    }
}

fn config(max: usize) -> PoolConfig {
    PoolConfig {
        max_tasks_count: max,
        parallel_read_limit: max.max(2),
        primary_read_timeout: Duration::from_millis(60),
        idle_delay: Duration::from_millis(20),
        stop_grace: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(5),
        queue_activation: false,
    }
}

async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_blocking_reader_under_load() {
    let queue = InMemoryQueue::new();
    let metrics = Arc::new(ReadMetrics::default());
    let pool: ElasticPool<u32> = ElasticPool::new(
        RecordingFactory {
            queue: queue.clone(),
            metrics: Arc::clone(&metrics),
            dispatch_delay: Duration::from_millis(15),
        },
        config(4),
    );

    for item in 0..60 {
        queue.push(item);
    }
    pool.start().expect("start should succeed");

    assert!(wait_until(Duration::from_secs(20), || queue.is_empty()).await);
    assert!(wait_until(Duration::from_secs(2), || pool.tasks_count() == 1).await);
    pool.stop().await;

    assert_eq!(metrics.peak_blocking.load(Ordering::SeqCst), 1);
    assert!(metrics.immediate_reads.load(Ordering::SeqCst) > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn primary_survives_repeated_empty_reads() {
    let queue = InMemoryQueue::new();
    let metrics = Arc::new(ReadMetrics::default());
    let pool: ElasticPool<u32> = ElasticPool::new(
        RecordingFactory {
            queue: queue.clone(),
            metrics: Arc::clone(&metrics),
            dispatch_delay: Duration::from_millis(5),
        },
        config(4),
    );

    pool.start().expect("start should succeed");

    // several primary read timeouts elapse; the slot never turns over
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.tasks_count(), 1);
    }
    assert!(metrics.blocking_reads.load(Ordering::SeqCst) >= 3);

    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn secondaries_retire_once_the_source_is_empty() {
    let queue = InMemoryQueue::new();
    let metrics = Arc::new(ReadMetrics::default());
    let pool: ElasticPool<u32> = ElasticPool::new(
        RecordingFactory {
            queue: queue.clone(),
            metrics: Arc::clone(&metrics),
            dispatch_delay: Duration::from_millis(30),
        },
        config(4),
    );

    for item in 0..40 {
        queue.push(item);
    }
    pool.start().expect("start should succeed");

    assert!(wait_until(Duration::from_secs(20), || queue.is_empty()).await);
    assert!(wait_until(Duration::from_secs(2), || pool.tasks_count() == 1).await);
    assert_eq!(pool.available_permits(), 3);

    pool.stop().await;
}
