pub mod batch;
pub mod error;
pub mod task;

pub use batch::{BatchInfo, BatchOutcome};
pub use error::{PoolError, PoolErrorKind};
pub use task::{JobStatus, TaskId};
