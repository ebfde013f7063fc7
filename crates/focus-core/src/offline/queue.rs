//! Durable write-ahead queue of offline operations.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::db::OperationRepository;
use crate::error::Result;
use crate::models::{OfflineOperation, OperationId, OperationStatus};
use crate::util::{compact_text, unix_millis_now};

/// FIFO queue of mutating calls awaiting delivery.
///
/// Operations are persisted before any network attempt. A transient failure
/// returns the operation to the head of the queue until `max_retries` is
/// reached; a permanent failure marks it failed at once.
pub struct OfflineOperationQueue<R> {
    repo: R,
    max_retries: u32,
    retention: Duration,
}

impl<R: OperationRepository> OfflineOperationQueue<R> {
    pub const fn new(repo: R, max_retries: u32, retention: Duration) -> Self {
        Self {
            repo,
            max_retries,
            retention,
        }
    }

    pub const fn from_config(repo: R, config: &EngineConfig) -> Self {
        Self::new(repo, config.max_retries, config.completed_retention)
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Persist an operation at the tail
    pub fn enqueue(&self, operation: &OfflineOperation) -> Result<OperationId> {
        self.repo.enqueue(operation)?;
        tracing::debug!(
            operation = %operation.id,
            method = %operation.method,
            entity = %operation.target.entity_id,
            "Queued offline operation"
        );
        Ok(operation.id)
    }

    /// Claim the oldest pending operation
    pub fn dequeue_next(&self) -> Result<Option<OfflineOperation>> {
        self.repo.claim_next(unix_millis_now())
    }

    pub fn mark_completed(&self, operation: &mut OfflineOperation) -> Result<()> {
        operation.status = OperationStatus::Completed;
        operation.last_error = None;
        operation.updated_at = unix_millis_now();
        self.repo.save_outcome(operation)?;
        Ok(())
    }

    /// Hand a claimed operation back untouched, e.g. when the pass is halted
    pub fn release(&self, operation: &mut OfflineOperation) -> Result<()> {
        operation.status = OperationStatus::Pending;
        operation.updated_at = unix_millis_now();
        self.repo.save_outcome(operation)?;
        Ok(())
    }

    /// Record a failed attempt and return the resulting status
    pub fn mark_failed(
        &self,
        operation: &mut OfflineOperation,
        reason: &str,
        permanent: bool,
    ) -> Result<OperationStatus> {
        operation.last_error = Some(compact_text(reason));
        operation.updated_at = unix_millis_now();

        if permanent {
            operation.status = OperationStatus::Failed;
        } else {
            operation.retry_count = operation.retry_count.saturating_add(1);
            operation.status = if operation.retry_count >= self.max_retries {
                OperationStatus::Failed
            } else {
                OperationStatus::Pending
            };
        }
        self.repo.save_outcome(operation)?;

        if operation.status == OperationStatus::Failed {
            tracing::warn!(
                operation = %operation.id,
                entity = %operation.target.entity_id,
                retry_count = operation.retry_count,
                permanent,
                "Offline operation failed: {reason}"
            );
        }
        Ok(operation.status)
    }

    /// Return operations interrupted mid-flight to pending
    pub fn recover_in_flight(&self) -> Result<usize> {
        let recovered = self.repo.reset_in_flight(unix_millis_now())?;
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted offline operation(s)");
        }
        Ok(recovered)
    }

    /// Drop completed operations older than the retention window
    pub fn purge_completed(&self) -> Result<usize> {
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = unix_millis_now().saturating_sub(retention_ms);
        let purged = self.repo.purge_completed(cutoff)?;
        if purged > 0 {
            tracing::debug!("Purged {purged} completed offline operation(s)");
        }
        Ok(purged)
    }

    pub fn get(&self, id: &OperationId) -> Result<Option<OfflineOperation>> {
        self.repo.get_operation(id)
    }

    pub fn list(&self, status: Option<OperationStatus>) -> Result<Vec<OfflineOperation>> {
        self.repo.list_operations(status)
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.repo.count(OperationStatus::Pending)? + self.repo.count(OperationStatus::Processing)?)
    }

    pub fn failed_count(&self) -> Result<usize> {
        self.repo.count(OperationStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, EntityPayload, TaskPayload};
    use crate::services::DatabaseService;
    use pretty_assertions::assert_eq;

    fn queue(max_retries: u32) -> OfflineOperationQueue<DatabaseService> {
        OfflineOperationQueue::new(
            DatabaseService::open_in_memory().unwrap(),
            max_retries,
            Duration::from_secs(60),
        )
    }

    fn op(title: &str) -> OfflineOperation {
        OfflineOperation::create(Entity::new(
            "u",
            "d",
            EntityPayload::Task(TaskPayload::new(title)),
        ))
    }

    #[test]
    fn transient_failures_return_to_head_until_ceiling() {
        let queue = queue(3);
        let first = op("first");
        let second = op("second");
        queue.enqueue(&first).unwrap();
        queue.enqueue(&second).unwrap();

        for attempt in 1..=3 {
            let mut claimed = queue.dequeue_next().unwrap().unwrap();
            assert_eq!(claimed.id, first.id, "attempt {attempt} should retry the head");
            let status = queue.mark_failed(&mut claimed, "server busy", false).unwrap();
            if attempt < 3 {
                assert_eq!(status, OperationStatus::Pending);
            } else {
                assert_eq!(status, OperationStatus::Failed);
            }
        }

        let failed = queue.get(&first.id).unwrap().unwrap();
        assert_eq!(failed.retry_count, 3);
        assert_eq!(failed.last_error.as_deref(), Some("server busy"));

        // Failed operations are skipped
        let next = queue.dequeue_next().unwrap().unwrap();
        assert_eq!(next.id, second.id);
    }

    #[test]
    fn permanent_failure_skips_retries() {
        let queue = queue(3);
        queue.enqueue(&op("doomed")).unwrap();

        let mut claimed = queue.dequeue_next().unwrap().unwrap();
        let status = queue.mark_failed(&mut claimed, "not found", true).unwrap();
        assert_eq!(status, OperationStatus::Failed);
        assert_eq!(claimed.retry_count, 0);
        assert_eq!(queue.failed_count().unwrap(), 1);
        assert!(queue.dequeue_next().unwrap().is_none());
    }

    #[test]
    fn completed_operations_leave_the_pending_set() {
        let queue = queue(3);
        queue.enqueue(&op("done")).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);

        let mut claimed = queue.dequeue_next().unwrap().unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);
        queue.mark_completed(&mut claimed).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);

        // Still inside the retention window
        assert_eq!(queue.purge_completed().unwrap(), 0);
        assert_eq!(queue.list(Some(OperationStatus::Completed)).unwrap().len(), 1);
    }

    #[test]
    fn purge_removes_expired_completed_operations() {
        let queue = OfflineOperationQueue::new(
            DatabaseService::open_in_memory().unwrap(),
            3,
            Duration::ZERO,
        );
        queue.enqueue(&op("old")).unwrap();
        let mut claimed = queue.dequeue_next().unwrap().unwrap();
        queue.mark_completed(&mut claimed).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(queue.purge_completed().unwrap(), 1);
        assert!(queue.list(None).unwrap().is_empty());
    }

    #[test]
    fn recover_in_flight_requeues_processing() {
        let queue = queue(3);
        let operation = op("interrupted");
        queue.enqueue(&operation).unwrap();
        queue.dequeue_next().unwrap();
        assert!(queue.dequeue_next().unwrap().is_none());

        assert_eq!(queue.recover_in_flight().unwrap(), 1);
        let claimed = queue.dequeue_next().unwrap().unwrap();
        assert_eq!(claimed.id, operation.id);
    }

    #[test]
    fn long_errors_are_truncated() {
        let queue = queue(3);
        queue.enqueue(&op("noisy")).unwrap();
        let mut claimed = queue.dequeue_next().unwrap().unwrap();
        queue.mark_failed(&mut claimed, &"x".repeat(1_000), true).unwrap();
        assert_eq!(claimed.last_error.unwrap().len(), 180);
    }
}
