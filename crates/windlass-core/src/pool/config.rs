use std::time::Duration;

/// Tuning knobs for an [`ElasticPool`](crate::pool::ElasticPool).
///
/// `parallel_read_limit` counts the primary reader; the read throttle only
/// admits the non-primary remainder. `primary_read_timeout` bounds how long
/// the primary blocks on an empty source per attempt — it varies by
/// deployment mode, so it is configuration rather than a constant.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_tasks_count: usize,
    pub parallel_read_limit: usize,
    pub primary_read_timeout: Duration,
    /// Per-iteration delay while the pool is paused.
    pub idle_delay: Duration,
    /// Pause between firing the cancellation signal and draining on stop.
    pub stop_grace: Duration,
    /// Upper bound on waiting for workers to exit during stop.
    pub drain_timeout: Duration,
    /// When enabled the pool drains to zero tasks between wake-ups and is
    /// re-armed via `activate_queue`.
    pub queue_activation: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_tasks_count: 4,
            parallel_read_limit: 2,
            primary_read_timeout: Duration::from_secs(5),
            idle_delay: Duration::from_millis(500),
            stop_grace: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(30),
            queue_activation: false,
        }
    }
}
