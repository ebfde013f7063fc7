//! Entity repository implementation

use crate::error::Result;
use crate::models::{DeletedItem, Entity, EntityId, EntityKind};
use rusqlite::{params, Connection, OptionalExtension};

use super::{json_column, text_column};

/// Trait for versioned entity storage
///
/// Every write that replaces an existing row is conditional on the version the
/// caller read. A `false` return means another writer got there first.
pub trait EntityRepository {
    /// Get an entity by ID, including soft-deleted rows
    fn get(&self, id: &EntityId) -> Result<Option<Entity>>;

    /// Insert a new entity; returns `false` if the id already exists
    fn insert(&self, entity: &Entity) -> Result<bool>;

    /// Replace an entity if its stored version still equals `expected_version`
    fn compare_and_swap(&self, entity: &Entity, expected_version: i64) -> Result<bool>;

    /// Store a soft-deleted entity and its tombstone in one transaction
    fn soft_delete(
        &self,
        entity: &Entity,
        expected_version: i64,
        tombstone: &DeletedItem,
    ) -> Result<bool>;

    /// Remove an entity row and record its tombstone in one transaction
    fn hard_delete(
        &self,
        user_id: &str,
        id: &EntityId,
        expected_version: i64,
        tombstone: &DeletedItem,
    ) -> Result<bool>;

    /// Live entities with `updated_at > since`, oldest change first
    fn changed_since(&self, user_id: &str, since: i64) -> Result<Vec<Entity>>;

    /// Live entities for a user, most recently changed first
    fn list(&self, user_id: &str, kind: Option<EntityKind>) -> Result<Vec<Entity>>;

    /// Overwrite local state with an authoritative copy
    fn upsert(&self, entity: &Entity) -> Result<()>;

    /// Drop a row unconditionally; returns whether one existed
    fn purge(&self, id: &EntityId) -> Result<bool>;

    /// Look up the tombstone for an id
    fn tombstone(&self, id: &EntityId) -> Result<Option<DeletedItem>>;

    /// Tombstones with `deleted_at > since`, oldest first
    fn deleted_since(&self, user_id: &str, since: i64) -> Result<Vec<DeletedItem>>;
}

/// `SQLite` implementation of `EntityRepository`
pub struct SqliteEntityRepository<'a> {
    conn: &'a Connection,
}

const ENTITY_COLUMNS: &str =
    "id, user_id, version, created_at, updated_at, last_modified_device, is_deleted, payload";

impl<'a> SqliteEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entity from a database row
    fn parse_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
        Ok(Entity {
            id: text_column(row, 0)?,
            user_id: row.get(1)?,
            version: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            last_modified_device: row.get(5)?,
            deleted: row.get::<_, i32>(6)? != 0,
            payload: json_column(row, 7)?,
        })
    }

    fn parse_tombstone(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeletedItem> {
        Ok(DeletedItem {
            id: text_column(row, 0)?,
            kind: text_column(row, 1)?,
            deleted_at: row.get(2)?,
            device_id: row.get(3)?,
        })
    }

    fn swap(conn: &Connection, entity: &Entity, expected_version: i64) -> Result<bool> {
        let rows = conn.execute(
            "UPDATE entities
             SET version = ?, updated_at = ?, last_modified_device = ?, is_deleted = ?, payload = ?
             WHERE id = ? AND version = ?",
            params![
                entity.version,
                entity.updated_at,
                entity.last_modified_device,
                i32::from(entity.deleted),
                serde_json::to_string(&entity.payload)?,
                entity.id.as_str(),
                expected_version
            ],
        )?;
        Ok(rows == 1)
    }

    fn write_tombstone(conn: &Connection, user_id: &str, tombstone: &DeletedItem) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO tombstones (entity_id, user_id, kind, deleted_at, device_id)
             VALUES (?, ?, ?, ?, ?)",
            params![
                tombstone.id.as_str(),
                user_id,
                tombstone.kind.as_str(),
                tombstone.deleted_at,
                tombstone.device_id
            ],
        )?;
        Ok(())
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        let entity = self
            .conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"),
                params![id.as_str()],
                Self::parse_entity,
            )
            .optional()?;
        Ok(entity)
    }

    fn insert(&self, entity: &Entity) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO entities
                (id, user_id, kind, version, created_at, updated_at, last_modified_device, is_deleted, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entity.id.as_str(),
                entity.user_id,
                entity.kind().as_str(),
                entity.version,
                entity.created_at,
                entity.updated_at,
                entity.last_modified_device,
                i32::from(entity.deleted),
                serde_json::to_string(&entity.payload)?
            ],
        )?;
        Ok(rows == 1)
    }

    fn compare_and_swap(&self, entity: &Entity, expected_version: i64) -> Result<bool> {
        Self::swap(self.conn, entity, expected_version)
    }

    fn soft_delete(
        &self,
        entity: &Entity,
        expected_version: i64,
        tombstone: &DeletedItem,
    ) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        if !Self::swap(&tx, entity, expected_version)? {
            return Ok(false);
        }
        Self::write_tombstone(&tx, &entity.user_id, tombstone)?;
        tx.commit()?;
        Ok(true)
    }

    fn hard_delete(
        &self,
        user_id: &str,
        id: &EntityId,
        expected_version: i64,
        tombstone: &DeletedItem,
    ) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "DELETE FROM entities WHERE id = ? AND version = ?",
            params![id.as_str(), expected_version],
        )?;
        if rows == 0 {
            return Ok(false);
        }
        Self::write_tombstone(&tx, user_id, tombstone)?;
        tx.commit()?;
        Ok(true)
    }

    fn changed_since(&self, user_id: &str, since: i64) -> Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS}
             FROM entities
             WHERE user_id = ? AND updated_at > ? AND is_deleted = 0
             ORDER BY updated_at ASC, id ASC"
        ))?;

        let entities = stmt
            .query_map(params![user_id, since], Self::parse_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entities)
    }

    fn list(&self, user_id: &str, kind: Option<EntityKind>) -> Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS}
             FROM entities
             WHERE user_id = ?1 AND is_deleted = 0 AND (?2 IS NULL OR kind = ?2)
             ORDER BY updated_at DESC"
        ))?;

        let entities = stmt
            .query_map(
                params![user_id, kind.map(EntityKind::as_str)],
                Self::parse_entity,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entities)
    }

    fn upsert(&self, entity: &Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities
                (id, user_id, kind, version, created_at, updated_at, last_modified_device, is_deleted, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                updated_at = excluded.updated_at,
                last_modified_device = excluded.last_modified_device,
                is_deleted = excluded.is_deleted,
                payload = excluded.payload",
            params![
                entity.id.as_str(),
                entity.user_id,
                entity.kind().as_str(),
                entity.version,
                entity.created_at,
                entity.updated_at,
                entity.last_modified_device,
                i32::from(entity.deleted),
                serde_json::to_string(&entity.payload)?
            ],
        )?;
        Ok(())
    }

    fn purge(&self, id: &EntityId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM entities WHERE id = ?", params![id.as_str()])?;
        Ok(rows > 0)
    }

    fn tombstone(&self, id: &EntityId) -> Result<Option<DeletedItem>> {
        let item = self
            .conn
            .query_row(
                "SELECT entity_id, kind, deleted_at, device_id FROM tombstones WHERE entity_id = ?",
                params![id.as_str()],
                Self::parse_tombstone,
            )
            .optional()?;
        Ok(item)
    }

    fn deleted_since(&self, user_id: &str, since: i64) -> Result<Vec<DeletedItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, kind, deleted_at, device_id
             FROM tombstones
             WHERE user_id = ? AND deleted_at > ?
             ORDER BY deleted_at ASC",
        )?;

        let items = stmt
            .query_map(params![user_id, since], Self::parse_tombstone)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{EntityPayload, SessionPayload, SessionType, TaskPayload};

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn task(title: &str, updated_at: i64) -> Entity {
        let mut entity = Entity::new("user-1", "device-a", EntityPayload::Task(TaskPayload::new(title)));
        entity.created_at = updated_at;
        entity.updated_at = updated_at;
        entity
    }

    fn tombstone_for(entity: &Entity, deleted_at: i64) -> DeletedItem {
        DeletedItem {
            id: entity.id,
            kind: entity.kind(),
            deleted_at,
            device_id: "device-a".to_string(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let entity = task("Write report", 100);
        assert!(repo.insert(&entity).unwrap());

        let fetched = repo.get(&entity.id).unwrap().unwrap();
        assert_eq!(fetched, entity);
    }

    #[test]
    fn test_insert_existing_id_is_ignored() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let entity = task("Once", 100);
        assert!(repo.insert(&entity).unwrap());
        assert!(!repo.insert(&entity).unwrap());
    }

    #[test]
    fn test_compare_and_swap_requires_matching_version() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let entity = task("Original", 100);
        repo.insert(&entity).unwrap();

        let mut next = entity.clone();
        next.version = 2;
        next.updated_at = 200;
        next.payload = EntityPayload::Task(TaskPayload::new("Edited"));

        assert!(!repo.compare_and_swap(&next, 5).unwrap());
        assert!(repo.compare_and_swap(&next, 1).unwrap());
        // Second swap against the old version loses
        assert!(!repo.compare_and_swap(&next, 1).unwrap());

        let fetched = repo.get(&entity.id).unwrap().unwrap();
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.payload, next.payload);
    }

    #[test]
    fn test_changed_since_is_exclusive_and_ordered() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let late = task("Late", 300);
        let early = task("Early", 100);
        let middle = task("Middle", 200);
        for entity in [&late, &early, &middle] {
            repo.insert(entity).unwrap();
        }

        let changed = repo.changed_since("user-1", 100).unwrap();
        let ids: Vec<_> = changed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![middle.id, late.id]);

        // Restartable: the same query yields the same set
        assert_eq!(repo.changed_since("user-1", 100).unwrap(), changed);
        assert!(repo.changed_since("someone-else", 0).unwrap().is_empty());
    }

    #[test]
    fn test_soft_delete_hides_entity_and_records_tombstone() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let entity = task("Doomed", 100);
        repo.insert(&entity).unwrap();

        let mut deleted = entity.clone();
        deleted.deleted = true;
        deleted.version = 2;
        deleted.updated_at = 150;
        assert!(repo.soft_delete(&deleted, 1, &tombstone_for(&entity, 150)).unwrap());

        assert!(repo.changed_since("user-1", 0).unwrap().is_empty());
        assert!(repo.list("user-1", None).unwrap().is_empty());
        assert!(repo.get(&entity.id).unwrap().unwrap().deleted);

        let tombstones = repo.deleted_since("user-1", 0).unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].id, entity.id);
        assert!(repo.deleted_since("user-1", 150).unwrap().is_empty());
    }

    #[test]
    fn test_hard_delete_checks_version() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let session = Entity::new(
            "user-1",
            "device-a",
            EntityPayload::Session(SessionPayload::start(None, SessionType::Work, 1500)),
        );
        repo.insert(&session).unwrap();
        let tombstone = tombstone_for(&session, 500);

        assert!(!repo.hard_delete("user-1", &session.id, 7, &tombstone).unwrap());
        assert!(repo.tombstone(&session.id).unwrap().is_none());

        assert!(repo.hard_delete("user-1", &session.id, 1, &tombstone).unwrap());
        assert!(repo.get(&session.id).unwrap().is_none());
        assert_eq!(repo.tombstone(&session.id).unwrap().unwrap().kind, EntityKind::Session);
    }

    #[test]
    fn test_list_filters_by_kind() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        repo.insert(&task("Task", 100)).unwrap();
        let session = Entity::new(
            "user-1",
            "device-a",
            EntityPayload::Session(SessionPayload::start(None, SessionType::ShortBreak, 300)),
        );
        repo.insert(&session).unwrap();

        assert_eq!(repo.list("user-1", None).unwrap().len(), 2);
        let sessions = repo.list("user-1", Some(EntityKind::Session)).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, session.id);
    }

    #[test]
    fn test_upsert_overwrites_and_purge_removes() {
        let db = setup();
        let repo = SqliteEntityRepository::new(db.connection());

        let entity = task("Local", 100);
        repo.upsert(&entity).unwrap();

        let mut server_copy = entity.clone();
        server_copy.version = 4;
        server_copy.payload = EntityPayload::Task(TaskPayload::new("Server"));
        repo.upsert(&server_copy).unwrap();
        assert_eq!(repo.get(&entity.id).unwrap().unwrap(), server_copy);

        assert!(repo.purge(&entity.id).unwrap());
        assert!(!repo.purge(&entity.id).unwrap());
    }
}
