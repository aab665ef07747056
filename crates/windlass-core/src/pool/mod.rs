pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod in_memory;
pub mod roles;
pub mod throttle;
mod worker;

pub use cancel::CancelToken;
pub use config::PoolConfig;
pub use coordinator::ElasticPool;
pub use in_memory::{InMemoryQueue, SourceReader, SourceReaderFactory};
pub use roles::RoleRegistry;
pub use throttle::{ReadThrottle, ThrottlePermit};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{PoolError, TaskId};

pub type PoolResult<T> = Result<T, PoolError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a reader approaches the external source. The primary reader is the
/// only one allowed to block-wait on an empty source; everyone else polls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadMode {
    Blocking { timeout: Duration },
    Immediate,
}

/// Outcome of dispatching one item. `rollback` asks for the item to be
/// re-submitted to the source instead of being treated as consumed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DispatchOutcome {
    pub rollback: bool,
}

/// Result of one "process one unit" iteration, as reported back to the
/// worker loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnitReport {
    pub processed: bool,
    pub removable: bool,
}

/// One unit-of-work executor bound to a worker slot. Produced per task by a
/// [`ReaderFactory`]; the pool drives it through read/dispatch cycles.
pub trait ItemReader<T>: Send {
    /// Reads zero or one items, honoring the requested mode and the shared
    /// cancellation signal.
    fn read<'a>(
        &'a mut self,
        mode: ReadMode,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<Option<T>>>;

    fn dispatch<'a>(
        &'a mut self,
        item: &'a T,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<DispatchOutcome>>;

    /// Returns an item to the source after a rollback request.
    fn requeue(&mut self, item: T) -> BoxFuture<'_, PoolResult<()>>;

    /// Per-item hook invoked before a dispatch failure is propagated.
    fn on_item_error(&mut self, item: &T, error: &PoolError);
}

pub trait ReaderFactory<T>: Send + Sync {
    fn create(&self, task_id: TaskId) -> PoolResult<Box<dyn ItemReader<T>>>;
}

/// External message source, seen only through this seam. Transactional
/// behavior (ordering, delivery guarantees) is the source's own business.
pub trait MessageSource<T>: Send + Sync {
    fn receive<'a>(
        &'a self,
        mode: ReadMode,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<Option<T>>>;

    fn push_back(&self, item: T) -> BoxFuture<'_, PoolResult<()>>;
}

pub trait Dispatcher<T>: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        item: &'a T,
        task_id: TaskId,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PoolResult<DispatchOutcome>>;
}
