//! Offline operation queue storage

use crate::error::Result;
use crate::models::{EntityId, OfflineOperation, OperationId, OperationStatus, OperationTarget};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::text_column;

/// Durable FIFO storage for offline operations
pub trait OperationRepository {
    /// Append an operation at the tail of the queue
    fn enqueue(&self, operation: &OfflineOperation) -> Result<()>;

    /// Take the oldest pending operation and mark it processing
    fn claim_next(&self, now: i64) -> Result<Option<OfflineOperation>>;

    fn get_operation(&self, id: &OperationId) -> Result<Option<OfflineOperation>>;

    /// Persist status, retry count and last error for an operation
    fn save_outcome(&self, operation: &OfflineOperation) -> Result<bool>;

    /// Return operations stuck in processing to pending
    fn reset_in_flight(&self, now: i64) -> Result<usize>;

    /// Delete completed operations last touched before `before`
    fn purge_completed(&self, before: i64) -> Result<usize>;

    /// Operations in queue order, optionally filtered by status
    fn list_operations(&self, status: Option<OperationStatus>) -> Result<Vec<OfflineOperation>>;

    fn count(&self, status: OperationStatus) -> Result<usize>;

    /// Whether any unfinished operation targets this entity
    fn has_unfinished_for(&self, entity_id: &EntityId) -> Result<bool>;
}

/// `SQLite` implementation of `OperationRepository`
pub struct SqliteOperationRepository<'a> {
    conn: &'a Connection,
}

const OPERATION_COLUMNS: &str = "id, method, entity_kind, entity_id, payload, retry_count, status, last_error, created_at, updated_at";

impl<'a> SqliteOperationRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<OfflineOperation> {
        let payload = row
            .get::<_, Option<String>>(4)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?;

        Ok(OfflineOperation {
            id: text_column(row, 0)?,
            method: text_column(row, 1)?,
            target: OperationTarget {
                kind: text_column(row, 2)?,
                entity_id: text_column(row, 3)?,
            },
            payload,
            retry_count: row.get(5)?,
            status: text_column(row, 6)?,
            last_error: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl OperationRepository for SqliteOperationRepository<'_> {
    fn enqueue(&self, operation: &OfflineOperation) -> Result<()> {
        let payload = operation
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO offline_operations
                (id, method, entity_kind, entity_id, payload, retry_count, status, last_error, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                operation.id.as_str(),
                operation.method.as_str(),
                operation.target.kind.as_str(),
                operation.target.entity_id.as_str(),
                payload,
                operation.retry_count,
                operation.status.as_str(),
                operation.last_error,
                operation.created_at,
                operation.updated_at
            ],
        )?;
        Ok(())
    }

    fn claim_next(&self, now: i64) -> Result<Option<OfflineOperation>> {
        let tx = self.conn.unchecked_transaction()?;
        let next = tx
            .query_row(
                &format!(
                    "SELECT {OPERATION_COLUMNS} FROM offline_operations
                     WHERE status = 'pending'
                     ORDER BY seq ASC
                     LIMIT 1"
                ),
                [],
                Self::parse_operation,
            )
            .optional()?;

        let Some(mut operation) = next else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE offline_operations SET status = 'processing', updated_at = ? WHERE id = ?",
            params![now, operation.id.as_str()],
        )?;
        tx.commit()?;

        operation.status = OperationStatus::Processing;
        operation.updated_at = now;
        Ok(Some(operation))
    }

    fn get_operation(&self, id: &OperationId) -> Result<Option<OfflineOperation>> {
        let operation = self
            .conn
            .query_row(
                &format!("SELECT {OPERATION_COLUMNS} FROM offline_operations WHERE id = ?"),
                params![id.as_str()],
                Self::parse_operation,
            )
            .optional()?;
        Ok(operation)
    }

    fn save_outcome(&self, operation: &OfflineOperation) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE offline_operations
             SET status = ?, retry_count = ?, last_error = ?, updated_at = ?
             WHERE id = ?",
            params![
                operation.status.as_str(),
                operation.retry_count,
                operation.last_error,
                operation.updated_at,
                operation.id.as_str()
            ],
        )?;
        Ok(rows == 1)
    }

    fn reset_in_flight(&self, now: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE offline_operations SET status = 'pending', updated_at = ? WHERE status = 'processing'",
            params![now],
        )?;
        Ok(rows)
    }

    fn purge_completed(&self, before: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM offline_operations WHERE status = 'completed' AND updated_at < ?",
            params![before],
        )?;
        Ok(rows)
    }

    fn list_operations(&self, status: Option<OperationStatus>) -> Result<Vec<OfflineOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM offline_operations
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY seq ASC"
        ))?;

        let operations = stmt
            .query_map(
                params![status.map(OperationStatus::as_str)],
                Self::parse_operation,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(operations)
    }

    fn count(&self, status: OperationStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM offline_operations WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn has_unfinished_for(&self, entity_id: &EntityId) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM offline_operations
                WHERE entity_id = ? AND status IN ('pending', 'processing')
             )",
            params![entity_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
