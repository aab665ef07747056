use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::TaskId;

// Task ids wrap before reaching this value, so it is free to use as "none".
const NO_PRIMARY: u64 = u64::MAX;

/// Tracks which running reader currently holds primary status. At most one
/// reader is primary at any instant; claim and release are single
/// compare-and-swap operations and a holder is never preempted.
#[derive(Debug)]
pub struct RoleRegistry {
    primary: AtomicU64,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self {
            primary: AtomicU64::new(NO_PRIMARY),
        }
    }

    /// Claims primary status if nobody holds it.
    pub fn try_claim(&self, task_id: TaskId) -> bool {
        self.primary
            .compare_exchange(NO_PRIMARY, task_id.0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases primary status if this task holds it.
    pub fn release(&self, task_id: TaskId) -> bool {
        self.primary
            .compare_exchange(task_id.0, NO_PRIMARY, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_primary(&self, task_id: TaskId) -> bool {
        self.primary.load(Ordering::SeqCst) == task_id.0
    }

    pub fn current(&self) -> Option<TaskId> {
        match self.primary.load(Ordering::SeqCst) {
            NO_PRIMARY => None,
            id => Some(TaskId(id)),
        }
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::RoleRegistry;
    use crate::models::TaskId;

    #[test]
    fn only_one_claim_wins() {
        let roles = RoleRegistry::new();
        assert!(roles.try_claim(TaskId(1)));
        assert!(!roles.try_claim(TaskId(2)));
        assert!(roles.is_primary(TaskId(1)));
        assert!(!roles.is_primary(TaskId(2)));
        assert_eq!(roles.current(), Some(TaskId(1)));
    }

    #[test]
    fn release_only_succeeds_for_the_holder() {
        let roles = RoleRegistry::new();
        assert!(!roles.release(TaskId(1)));
        assert!(roles.try_claim(TaskId(1)));
        assert!(!roles.release(TaskId(2)));
        assert!(roles.release(TaskId(1)));
        assert_eq!(roles.current(), None);
        assert!(roles.try_claim(TaskId(2)));
    }
}
