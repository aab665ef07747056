#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TaskId(pub u64);

/// Overall status of a tracked batch job. `Running` is the sole initial
/// state; the other three are terminal and a job transitions out of
/// `Running` at most once.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum JobStatus {
    Running,
    Success,
    Error,
    Cancelled,
}
