use crate::models::{JobStatus, PoolError};

/// Snapshot of a batch's submitted-item count. `size` only grows while
/// `is_complete` is false; once complete, the size is frozen.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchInfo {
    pub size: u64,
    pub is_complete: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchOutcome {
    pub status: JobStatus,
    pub error: Option<PoolError>,
}
