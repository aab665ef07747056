use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::time::{Instant, sleep, timeout};

use crate::models::TaskId;
use crate::pool::config::PoolConfig;
use crate::pool::roles::RoleRegistry;
use crate::pool::throttle::ReadThrottle;
use crate::pool::worker::UnitContext;
use crate::pool::{CancelToken, ItemReader, PoolResult, ReaderFactory};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TaskSlot {
    Scheduled,
    Running,
}

struct TaskEntry {
    slot: TaskSlot,
    run: u64,
}

struct RunHandle {
    token: CancelToken,
    generation: u64,
}

/// Self-scaling coordinator for consuming work items with a bounded number
/// of concurrent reader tasks.
///
/// Capacity is a signed permit counter: spawning decrements it, every
/// exiting worker's completion continuation returns exactly one permit, and
/// a shrink drives it transiently negative so the pool drains to the new
/// target purely through natural exits. Start/stop are idempotent and the
/// pool survives any individual worker failure.
pub struct ElasticPool<T: Send + 'static> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Send + 'static> Clone for ElasticPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct PoolShared<T: Send + 'static> {
    config: PoolConfig,
    factory: Box<dyn ReaderFactory<T>>,
    permits: AtomicI64,
    max_tasks: AtomicI64,
    task_seq: AtomicU64,
    started: AtomicBool,
    paused: AtomicBool,
    run_seq: AtomicU64,
    run: Mutex<RunHandle>,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    task_exited: Notify,
    roles: RoleRegistry,
    throttle: ReadThrottle,
}

impl<T: Send + 'static> ElasticPool<T> {
    pub fn new(factory: impl ReaderFactory<T> + 'static, config: PoolConfig) -> Self {
        let throttle = ReadThrottle::for_parallel_limit(config.parallel_read_limit);
        Self {
            shared: Arc::new(PoolShared {
                factory: Box::new(factory),
                permits: AtomicI64::new(0),
                max_tasks: AtomicI64::new(config.max_tasks_count as i64),
                task_seq: AtomicU64::new(0),
                started: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                run_seq: AtomicU64::new(0),
                run: Mutex::new(RunHandle {
                    token: CancelToken::new(),
                    generation: 0,
                }),
                tasks: Mutex::new(HashMap::new()),
                task_exited: Notify::new(),
                roles: RoleRegistry::new(),
                throttle,
                config,
            }),
        }
    }

    /// Starts the pool and spawns its first reader. Idempotent: concurrent
    /// calls race on the started flag and only the winner initializes.
    /// Already-started is not an error; the only hard failure is being
    /// unable to set up the very first reader.
    pub fn start(&self) -> PoolResult<bool> {
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(true);
        }

        let generation = self.shared.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut run = lock(&self.shared.run);
            *run = RunHandle {
                token: CancelToken::new(),
                generation,
            };
        }
        self.shared.task_seq.store(0, Ordering::SeqCst);
        self.shared
            .permits
            .store(self.shared.max_tasks.load(Ordering::SeqCst), Ordering::SeqCst);
        self.shared.throttle.open();

        if let Err(error) = self.shared.try_start_task() {
            self.shared.started.store(false, Ordering::SeqCst);
            return Err(error);
        }
        Ok(true)
    }

    /// Stops the pool: fires the shared cancellation signal, waits a short
    /// grace period, then waits for registered tasks up to the drain
    /// timeout. The task table is cleared and permits zeroed regardless, so
    /// a subsequent start begins clean even if stragglers are still
    /// finishing in the background.
    pub async fn stop(&self) {
        if self
            .shared
            .started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let token = lock(&self.shared.run).token.clone();
        token.cancel();
        self.shared.throttle.close();
        self.shared.paused.store(false, Ordering::SeqCst);

        sleep(self.shared.config.stop_grace).await;

        let deadline = Instant::now() + self.shared.config.drain_timeout;
        loop {
            let notified = self.shared.task_exited.notified();
            let remaining_tasks = lock(&self.shared.tasks).len();
            if remaining_tasks == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                let scheduled = lock(&self.shared.tasks)
                    .values()
                    .filter(|entry| entry.slot == TaskSlot::Scheduled)
                    .count();
                tracing::warn!(
                    remaining = remaining_tasks,
                    scheduled,
                    "pool stop drain timed out; remaining tasks will finish in the background"
                );
                break;
            }
            let _ = timeout(deadline - now, notified).await;
        }

        lock(&self.shared.tasks).clear();
        self.shared.permits.store(0, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// While paused, every reader short-circuits to an idle delay without
    /// exiting or touching the role registry, so resume is instantaneous.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
    }

    pub fn max_tasks_count(&self) -> usize {
        self.shared.max_tasks.load(Ordering::SeqCst).max(0) as usize
    }

    /// Applies `new - old` directly onto the permit counter rather than
    /// resetting it. Shrinking may drive permits negative; exiting workers
    /// must repay the debt before any new reader may spawn.
    pub fn set_max_tasks_count(&self, value: usize) {
        let new = value as i64;
        let old = self.shared.max_tasks.swap(new, Ordering::SeqCst);
        let delta = new - old;
        if delta == 0 || !self.shared.started.load(Ordering::SeqCst) {
            return;
        }
        self.shared.permits.fetch_add(delta, Ordering::SeqCst);
        if self.tasks_count() == 0 {
            if let Err(error) = self.shared.try_start_task() {
                tracing::error!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to spawn reader after resize"
                );
            }
        }
    }

    pub fn tasks_count(&self) -> usize {
        lock(&self.shared.tasks).len()
    }

    /// Current spawn capacity; transiently negative during a shrink.
    pub fn available_permits(&self) -> i64 {
        self.shared.permits.load(Ordering::SeqCst)
    }

    /// The cancellation signal of the current run.
    pub fn cancel_token(&self) -> CancelToken {
        lock(&self.shared.run).token.clone()
    }

    pub fn is_queue_activation_enabled(&self) -> bool {
        self.shared.config.queue_activation
    }

    /// Spawns exactly one reader if activation mode is enabled, the pool is
    /// started, and no tasks are currently running; otherwise a no-op.
    pub fn activate_queue(&self) -> bool {
        if !self.shared.config.queue_activation || !self.shared.started.load(Ordering::SeqCst) {
            return false;
        }
        if self.tasks_count() > 0 {
            return false;
        }
        match self.shared.try_start_task() {
            Ok(spawned) => spawned,
            Err(error) => {
                tracing::error!(
                    kind = ?error.kind,
                    message = %error.message,
                    "queue activation failed to spawn a reader"
                );
                false
            }
        }
    }
}

impl<T: Send + 'static> PoolShared<T> {
    /// Attempts to claim a permit and spawn one reader task. `Ok(false)`
    /// means no capacity; `Err` means reader setup failed after the permit
    /// was claimed, in which case the permit has been returned.
    fn try_start_task(self: &Arc<Self>) -> PoolResult<bool> {
        loop {
            let current = self.permits.load(Ordering::SeqCst);
            if current <= 0 {
                return Ok(false);
            }
            if self
                .permits
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }

        let task_id = self.next_task_id();
        let (token, generation) = {
            let run = lock(&self.run);
            (run.token.clone(), run.generation)
        };

        // visible in the table before the worker is scheduled
        lock(&self.tasks).insert(
            task_id,
            TaskEntry {
                slot: TaskSlot::Scheduled,
                run: generation,
            },
        );

        let reader = match self.factory.create(task_id) {
            Ok(reader) => reader,
            Err(error) => {
                self.remove_task(task_id, generation);
                return Err(error);
            }
        };

        // the worker body runs on its own task so a panic in user code
        // (dispatch, callbacks) cannot skip the cleanup below
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let body = {
                let shared = Arc::clone(&shared);
                let token = token.clone();
                tokio::spawn(async move { shared.run_worker(task_id, reader, token).await })
            };
            let panicked = body.await.is_err_and(|error| error.is_panic());

            shared.roles.release(task_id);
            shared.remove_task(task_id, generation);

            if panicked && !token.is_cancelled() && shared.started.load(Ordering::SeqCst) {
                tracing::error!(task_id = task_id.0, "reader task panicked; spawning a replacement");
                if let Err(error) = shared.try_start_task() {
                    tracing::error!(
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to replace a panicked reader"
                    );
                }
            }
        });

        if let Some(entry) = lock(&self.tasks).get_mut(&task_id) {
            if entry.run == generation {
                entry.slot = TaskSlot::Running;
            }
        }
        Ok(true)
    }

    /// The sole place a permit is returned. Gated on the run generation so a
    /// straggler outliving a timed-out drain cannot credit the next run.
    fn remove_task(&self, task_id: TaskId, generation: u64) {
        {
            let mut tasks = lock(&self.tasks);
            if tasks
                .get(&task_id)
                .is_some_and(|entry| entry.run == generation)
            {
                tasks.remove(&task_id);
            }
        }
        if lock(&self.run).generation == generation {
            self.permits.fetch_add(1, Ordering::SeqCst);
        }
        self.task_exited.notify_waiters();
    }

    fn next_task_id(&self) -> TaskId {
        // wraps before the role registry's sentinel value; live task counts
        // stay far below the wrap point
        let result = self
            .task_seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                Some(if value >= u64::MAX - 1 { 0 } else { value + 1 })
            });
        match result {
            Ok(previous) | Err(previous) => TaskId(previous),
        }
    }

    async fn run_worker(
        self: &Arc<Self>,
        task_id: TaskId,
        mut reader: Box<dyn ItemReader<T>>,
        token: CancelToken,
    ) {
        loop {
            if token.is_cancelled() {
                break;
            }

            let context = UnitContext {
                task_id,
                roles: &self.roles,
                throttle: &self.throttle,
                config: &self.config,
                paused: self.paused.load(Ordering::SeqCst),
            };

            match context.process_unit(reader.as_mut(), &token).await {
                Ok(report) => {
                    if report.processed {
                        // backlog exists; try to grow toward the target
                        if let Err(error) = self.try_start_task() {
                            tracing::error!(
                                task_id = task_id.0,
                                kind = ?error.kind,
                                message = %error.message,
                                "failed to scale up reader pool"
                            );
                        }
                    }
                    if report.removable {
                        break;
                    }
                }
                Err(error) => {
                    if !error.is_cancelled() {
                        tracing::error!(
                            task_id = task_id.0,
                            kind = ?error.kind,
                            message = %error.message,
                            "reader task stopped after processing failure"
                        );
                    }
                    break;
                }
            }
        }
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
