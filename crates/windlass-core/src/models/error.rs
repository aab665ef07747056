use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PoolErrorKind {
    InvalidInput,
    Timeout,
    Cancelled,
    Read,
    Dispatch,
    Aggregate,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolError {
    pub task: Option<TaskId>,
    pub kind: PoolErrorKind,
    pub message: String,
    pub related: Vec<PoolError>,
}

impl PoolError {
    pub fn new(kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            kind,
            message: message.into(),
            related: Vec::new(),
        }
    }

    pub fn for_task(task: TaskId, kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: Some(task),
            ..Self::new(kind, message)
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(PoolErrorKind::Cancelled, message)
    }

    pub fn aggregate(message: impl Into<String>, related: Vec<PoolError>) -> Self {
        Self {
            related,
            ..Self::new(PoolErrorKind::Aggregate, message)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == PoolErrorKind::Cancelled
    }

    /// Collapses an aggregate error to a single outcome: cancellation members
    /// are dropped, the first genuine member wins, and an all-cancellation
    /// aggregate reduces to a cancellation. Non-aggregate errors pass through.
    pub fn resolve(self) -> PoolError {
        if self.kind != PoolErrorKind::Aggregate {
            return self;
        }
        match first_genuine(self.related) {
            Some(error) => error,
            None => PoolError {
                task: self.task,
                kind: PoolErrorKind::Cancelled,
                message: self.message,
                related: Vec::new(),
            },
        }
    }
}

fn first_genuine(errors: Vec<PoolError>) -> Option<PoolError> {
    for error in errors {
        match error.kind {
            PoolErrorKind::Aggregate => {
                if let Some(genuine) = first_genuine(error.related) {
                    return Some(genuine);
                }
            }
            PoolErrorKind::Cancelled => {}
            _ => return Some(error),
        }
    }
    None
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for PoolError {}

#[cfg(test)]
mod tests {
    use super::{PoolError, PoolErrorKind};

    #[test]
    fn non_aggregate_errors_resolve_to_themselves() {
        let error = PoolError::new(PoolErrorKind::Dispatch, "boom");
        assert_eq!(error.clone().resolve(), error);
    }

    #[test]
    fn aggregate_promotes_first_genuine_member() {
        let aggregate = PoolError::aggregate(
            "several tasks failed",
            vec![
                PoolError::cancelled("shutdown"),
                PoolError::new(PoolErrorKind::Dispatch, "first"),
                PoolError::new(PoolErrorKind::Internal, "second"),
            ],
        );
        let resolved = aggregate.resolve();
        assert_eq!(resolved.kind, PoolErrorKind::Dispatch);
        assert_eq!(resolved.message, "first");
    }

    #[test]
    fn nested_aggregates_are_flattened() {
        let aggregate = PoolError::aggregate(
            "outer",
            vec![
                PoolError::cancelled("shutdown"),
                PoolError::aggregate(
                    "inner",
                    vec![
                        PoolError::cancelled("shutdown"),
                        PoolError::new(PoolErrorKind::Read, "deep failure"),
                    ],
                ),
            ],
        );
        let resolved = aggregate.resolve();
        assert_eq!(resolved.kind, PoolErrorKind::Read);
        assert_eq!(resolved.message, "deep failure");
    }

    #[test]
    fn all_cancellation_aggregate_reduces_to_cancellation() {
        let aggregate = PoolError::aggregate(
            "drained",
            vec![
                PoolError::cancelled("one"),
                PoolError::aggregate("inner", vec![PoolError::cancelled("two")]),
            ],
        );
        let resolved = aggregate.resolve();
        assert!(resolved.is_cancelled());
        assert_eq!(resolved.message, "drained");
    }
}
