//! Shared database service wrapper used by the server and clients.
//!
//! Wraps one `Database` behind a mutex and implements every storage trait by
//! opening a short-lived repository per call. The lock is held for a single
//! statement or transaction, never across a read-modify-write.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::db::{
    ConflictLog, CursorStore, Database, DeviceRegistry, EntityRepository, LocalStateRepository,
    OperationRepository, SqliteEntityRepository, SqliteLocalStateRepository,
    SqliteOperationRepository, SqliteSyncRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    Conflict, DeletedItem, Device, Entity, EntityId, EntityKind, OfflineOperation, OperationId,
    OperationStatus, SyncCursor,
};

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        tracing::info!("Opened sync database at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run a closure against the locked connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().map_err(|_| Error::LockPoisoned)?;
        f(db.connection())
    }
}

impl EntityRepository for DatabaseService {
    fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).get(id))
    }

    fn insert(&self, entity: &Entity) -> Result<bool> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).insert(entity))
    }

    fn compare_and_swap(&self, entity: &Entity, expected_version: i64) -> Result<bool> {
        self.with_connection(|conn| {
            SqliteEntityRepository::new(conn).compare_and_swap(entity, expected_version)
        })
    }

    fn soft_delete(
        &self,
        entity: &Entity,
        expected_version: i64,
        tombstone: &DeletedItem,
    ) -> Result<bool> {
        self.with_connection(|conn| {
            SqliteEntityRepository::new(conn).soft_delete(entity, expected_version, tombstone)
        })
    }

    fn hard_delete(
        &self,
        user_id: &str,
        id: &EntityId,
        expected_version: i64,
        tombstone: &DeletedItem,
    ) -> Result<bool> {
        self.with_connection(|conn| {
            SqliteEntityRepository::new(conn).hard_delete(user_id, id, expected_version, tombstone)
        })
    }

    fn changed_since(&self, user_id: &str, since: i64) -> Result<Vec<Entity>> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).changed_since(user_id, since))
    }

    fn list(&self, user_id: &str, kind: Option<EntityKind>) -> Result<Vec<Entity>> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).list(user_id, kind))
    }

    fn upsert(&self, entity: &Entity) -> Result<()> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).upsert(entity))
    }

    fn purge(&self, id: &EntityId) -> Result<bool> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).purge(id))
    }

    fn tombstone(&self, id: &EntityId) -> Result<Option<DeletedItem>> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).tombstone(id))
    }

    fn deleted_since(&self, user_id: &str, since: i64) -> Result<Vec<DeletedItem>> {
        self.with_connection(|conn| SqliteEntityRepository::new(conn).deleted_since(user_id, since))
    }
}

impl CursorStore for DatabaseService {
    fn cursor(&self, user_id: &str, device_id: &str) -> Result<Option<SyncCursor>> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).cursor(user_id, device_id))
    }

    fn get_or_create_cursor(&self, user_id: &str, device_id: &str, now: i64) -> Result<SyncCursor> {
        self.with_connection(|conn| {
            SqliteSyncRepository::new(conn).get_or_create_cursor(user_id, device_id, now)
        })
    }

    fn advance_cursor(&self, user_id: &str, device_id: &str, to: i64, now: i64) -> Result<()> {
        self.with_connection(|conn| {
            SqliteSyncRepository::new(conn).advance_cursor(user_id, device_id, to, now)
        })
    }

    fn reset_cursor(&self, user_id: &str, device_id: &str, now: i64) -> Result<bool> {
        self.with_connection(|conn| {
            SqliteSyncRepository::new(conn).reset_cursor(user_id, device_id, now)
        })
    }

    fn latest_sync_time(&self, user_id: &str) -> Result<Option<i64>> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).latest_sync_time(user_id))
    }
}

impl DeviceRegistry for DatabaseService {
    fn register_device(&self, device: &Device) -> Result<()> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).register_device(device))
    }

    fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).list_devices(user_id))
    }
}

impl ConflictLog for DatabaseService {
    fn record_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).record_conflict(conflict))
    }

    fn list_conflicts(&self, user_id: &str, limit: usize) -> Result<Vec<Conflict>> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).list_conflicts(user_id, limit))
    }

    fn conflicts_for_entity(&self, user_id: &str, entity_id: &EntityId) -> Result<Vec<Conflict>> {
        self.with_connection(|conn| {
            SqliteSyncRepository::new(conn).conflicts_for_entity(user_id, entity_id)
        })
    }

    fn conflict_summary(&self, user_id: &str) -> Result<(usize, Option<i64>)> {
        self.with_connection(|conn| SqliteSyncRepository::new(conn).conflict_summary(user_id))
    }
}

impl OperationRepository for DatabaseService {
    fn enqueue(&self, operation: &OfflineOperation) -> Result<()> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).enqueue(operation))
    }

    fn claim_next(&self, now: i64) -> Result<Option<OfflineOperation>> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).claim_next(now))
    }

    fn get_operation(&self, id: &OperationId) -> Result<Option<OfflineOperation>> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).get_operation(id))
    }

    fn save_outcome(&self, operation: &OfflineOperation) -> Result<bool> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).save_outcome(operation))
    }

    fn reset_in_flight(&self, now: i64) -> Result<usize> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).reset_in_flight(now))
    }

    fn purge_completed(&self, before: i64) -> Result<usize> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).purge_completed(before))
    }

    fn list_operations(&self, status: Option<OperationStatus>) -> Result<Vec<OfflineOperation>> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).list_operations(status))
    }

    fn count(&self, status: OperationStatus) -> Result<usize> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).count(status))
    }

    fn has_unfinished_for(&self, entity_id: &EntityId) -> Result<bool> {
        self.with_connection(|conn| SqliteOperationRepository::new(conn).has_unfinished_for(entity_id))
    }
}

impl LocalStateRepository for DatabaseService {
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| SqliteLocalStateRepository::new(conn).get_value(key))
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| SqliteLocalStateRepository::new(conn).set_value(key, value))
    }
}
