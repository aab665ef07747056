use tokio::time::sleep;

use crate::models::TaskId;
use crate::pool::config::PoolConfig;
use crate::pool::roles::RoleRegistry;
use crate::pool::throttle::ReadThrottle;
use crate::pool::{CancelToken, ItemReader, PoolResult, ReadMode, UnitReport};

/// Per-iteration view of the pool state a reader needs to process one unit.
pub(crate) struct UnitContext<'a> {
    pub(crate) task_id: TaskId,
    pub(crate) roles: &'a RoleRegistry,
    pub(crate) throttle: &'a ReadThrottle,
    pub(crate) config: &'a PoolConfig,
    pub(crate) paused: bool,
}

impl UnitContext<'_> {
    /// One iteration of the reader loop: honors pause, negotiates the primary
    /// role, reads at most one item, dispatches it, and reports whether this
    /// reader may remove itself.
    pub(crate) async fn process_unit<T>(
        &self,
        reader: &mut dyn ItemReader<T>,
        cancel: &CancelToken,
    ) -> PoolResult<UnitReport> {
        if self.paused {
            tokio::select! {
                _ = sleep(self.config.idle_delay) => {}
                _ = cancel.cancelled() => {}
            }
            return Ok(UnitReport {
                processed: false,
                removable: false,
            });
        }

        let is_primary = self.roles.is_primary(self.task_id) || self.roles.try_claim(self.task_id);

        let item = if is_primary {
            // sole reader allowed to block-wait on an empty source
            reader
                .read(
                    ReadMode::Blocking {
                        timeout: self.config.primary_read_timeout,
                    },
                    cancel,
                )
                .await?
        } else {
            let _permit = self.throttle.acquire(cancel).await?;
            reader.read(ReadMode::Immediate, cancel).await?
        };

        let Some(item) = item else {
            let removable = cancel.is_cancelled()
                || self.config.queue_activation
                || !self.roles.is_primary(self.task_id);
            return Ok(UnitReport {
                processed: false,
                removable,
            });
        };

        // hand listening duty to another reader while the dispatch runs
        self.roles.release(self.task_id);

        match reader.dispatch(&item, cancel).await {
            Ok(outcome) => {
                if outcome.rollback {
                    reader.requeue(item).await?;
                }
            }
            Err(error) => {
                if !error.is_cancelled() {
                    reader.on_item_error(&item, &error);
                }
                return Err(error);
            }
        }

        // reclaim listening candidacy, but never preempt another holder
        self.roles.try_claim(self.task_id);

        Ok(UnitReport {
            processed: true,
            removable: false,
        })
    }
}
