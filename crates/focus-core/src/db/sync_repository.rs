//! Sync bookkeeping: cursors, device registry and conflict history

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{Conflict, Device, EntityId, SyncCursor};
use rusqlite::{params, Connection, OptionalExtension};

use super::{json_column, text_column};

/// Per (user, device) sync bookmarks
pub trait CursorStore {
    fn cursor(&self, user_id: &str, device_id: &str) -> Result<Option<SyncCursor>>;

    /// Fetch the cursor, creating it at epoch zero on first contact
    fn get_or_create_cursor(&self, user_id: &str, device_id: &str, now: i64) -> Result<SyncCursor>;

    /// Move the cursor forward; never moves it backward
    fn advance_cursor(&self, user_id: &str, device_id: &str, to: i64, now: i64) -> Result<()>;

    /// Rewind a device to epoch zero so its next exchange is a full resync
    fn reset_cursor(&self, user_id: &str, device_id: &str, now: i64) -> Result<bool>;

    /// Most recent cursor across a user's devices
    fn latest_sync_time(&self, user_id: &str) -> Result<Option<i64>>;
}

/// Devices known per user
pub trait DeviceRegistry {
    /// Insert or refresh a device, keeping its original registration time
    fn register_device(&self, device: &Device) -> Result<()>;

    /// Devices for a user, most recently seen first
    fn list_devices(&self, user_id: &str) -> Result<Vec<Device>>;
}

/// Append-only conflict history
pub trait ConflictLog {
    fn record_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// Newest first
    fn list_conflicts(&self, user_id: &str, limit: usize) -> Result<Vec<Conflict>>;

    /// Every conflict recorded for one entity, oldest first
    fn conflicts_for_entity(&self, user_id: &str, entity_id: &EntityId) -> Result<Vec<Conflict>>;

    /// Total conflicts and the time of the latest one
    fn conflict_summary(&self, user_id: &str) -> Result<(usize, Option<i64>)>;
}

/// `SQLite` implementation of the sync bookkeeping traits
pub struct SqliteSyncRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_cursor(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncCursor> {
        Ok(SyncCursor {
            user_id: row.get(0)?,
            device_id: row.get(1)?,
            last_sync_time: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn parse_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
        Ok(Device {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            device_type: row.get(3)?,
            platform: row.get(4)?,
            app_version: row.get(5)?,
            last_seen: row.get(6)?,
            registered_at: row.get(7)?,
        })
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
        Ok(Conflict {
            id: text_column(row, 0)?,
            user_id: row.get(1)?,
            entity_id: text_column(row, 2)?,
            entity_kind: text_column(row, 3)?,
            local_version: json_column(row, 4)?,
            remote_version: json_column(row, 5)?,
            resolution: text_column(row, 6)?,
            winner: text_column(row, 7)?,
            resolved_at: row.get(8)?,
        })
    }
}

impl CursorStore for SqliteSyncRepository<'_> {
    fn cursor(&self, user_id: &str, device_id: &str) -> Result<Option<SyncCursor>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT user_id, device_id, last_sync_time, updated_at
                 FROM sync_cursors WHERE user_id = ? AND device_id = ?",
                params![user_id, device_id],
                Self::parse_cursor,
            )
            .optional()?;
        Ok(cursor)
    }

    fn get_or_create_cursor(&self, user_id: &str, device_id: &str, now: i64) -> Result<SyncCursor> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_cursors (user_id, device_id, last_sync_time, updated_at)
             VALUES (?, ?, 0, ?)",
            params![user_id, device_id, now],
        )?;
        let cursor = self.conn.query_row(
            "SELECT user_id, device_id, last_sync_time, updated_at
             FROM sync_cursors WHERE user_id = ? AND device_id = ?",
            params![user_id, device_id],
            Self::parse_cursor,
        )?;
        Ok(cursor)
    }

    fn advance_cursor(&self, user_id: &str, device_id: &str, to: i64, now: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_cursors (user_id, device_id, last_sync_time, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, device_id) DO UPDATE SET
                last_sync_time = MAX(sync_cursors.last_sync_time, excluded.last_sync_time),
                updated_at = excluded.updated_at",
            params![user_id, device_id, to, now],
        )?;
        Ok(())
    }

    fn reset_cursor(&self, user_id: &str, device_id: &str, now: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_cursors SET last_sync_time = 0, updated_at = ?
             WHERE user_id = ? AND device_id = ?",
            params![now, user_id, device_id],
        )?;
        Ok(rows > 0)
    }

    fn latest_sync_time(&self, user_id: &str) -> Result<Option<i64>> {
        let latest = self.conn.query_row(
            "SELECT MAX(last_sync_time) FROM sync_cursors WHERE user_id = ? AND last_sync_time > 0",
            params![user_id],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(latest)
    }
}

impl DeviceRegistry for SqliteSyncRepository<'_> {
    fn register_device(&self, device: &Device) -> Result<()> {
        // Blank descriptors from a terse client never erase what we already know.
        self.conn.execute(
            "INSERT INTO devices
                (user_id, id, name, device_type, platform, app_version, last_seen, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, id) DO UPDATE SET
                name = CASE WHEN excluded.name = '' THEN devices.name ELSE excluded.name END,
                device_type = CASE WHEN excluded.device_type = '' THEN devices.device_type ELSE excluded.device_type END,
                platform = CASE WHEN excluded.platform = '' THEN devices.platform ELSE excluded.platform END,
                app_version = CASE WHEN excluded.app_version = '' THEN devices.app_version ELSE excluded.app_version END,
                last_seen = MAX(devices.last_seen, excluded.last_seen)",
            params![
                device.user_id,
                device.id,
                device.name,
                device.device_type,
                device.platform,
                device.app_version,
                device.last_seen,
                device.registered_at
            ],
        )?;
        Ok(())
    }

    fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, device_type, platform, app_version, last_seen, registered_at
             FROM devices
             WHERE user_id = ?
             ORDER BY last_seen DESC, id ASC",
        )?;

        let devices = stmt
            .query_map(params![user_id], Self::parse_device)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(devices)
    }
}

impl ConflictLog for SqliteSyncRepository<'_> {
    fn record_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_conflicts
                (id, user_id, entity_id, entity_kind, local_version, remote_version, resolution, winner, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.id.to_string(),
                conflict.user_id,
                conflict.entity_id.as_str(),
                conflict.entity_kind.as_str(),
                serde_json::to_string(&conflict.local_version)?,
                serde_json::to_string(&conflict.remote_version)?,
                conflict.resolution.as_str(),
                conflict.winner.as_str(),
                conflict.resolved_at
            ],
        )?;
        Ok(())
    }

    fn list_conflicts(&self, user_id: &str, limit: usize) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, entity_id, entity_kind, local_version, remote_version, resolution, winner, resolved_at
             FROM sync_conflicts
             WHERE user_id = ?
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![user_id, limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn conflicts_for_entity(&self, user_id: &str, entity_id: &EntityId) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, entity_id, entity_kind, local_version, remote_version, resolution, winner, resolved_at
             FROM sync_conflicts
             WHERE entity_id = ? AND user_id = ?
             ORDER BY resolved_at ASC, id ASC",
        )?;

        let conflicts = stmt
            .query_map(params![entity_id.as_str(), user_id], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn conflict_summary(&self, user_id: &str) -> Result<(usize, Option<i64>)> {
        let (count, latest) = self.conn.query_row(
            "SELECT COUNT(*), MAX(resolved_at) FROM sync_conflicts WHERE user_id = ?",
            params![user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
        )?;
        Ok((usize::try_from(count).unwrap_or_default(), latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{
        ConflictWinner, DeviceInfo, Entity, EntityPayload, Resolution, TaskPayload,
    };
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_cursor_created_at_epoch_zero() {
        let db = setup();
        let repo = SqliteSyncRepository::new(db.connection());

        assert!(repo.cursor("u", "d").unwrap().is_none());
        let cursor = repo.get_or_create_cursor("u", "d", 10).unwrap();
        assert_eq!(cursor.last_sync_time, 0);

        // Creating again leaves the existing row alone
        repo.advance_cursor("u", "d", 500, 20).unwrap();
        let cursor = repo.get_or_create_cursor("u", "d", 30).unwrap();
        assert_eq!(cursor.last_sync_time, 500);
    }

    #[test]
    fn test_cursor_never_moves_backward() {
        let db = setup();
        let repo = SqliteSyncRepository::new(db.connection());

        repo.advance_cursor("u", "d", 500, 1).unwrap();
        repo.advance_cursor("u", "d", 300, 2).unwrap();
        assert_eq!(repo.cursor("u", "d").unwrap().unwrap().last_sync_time, 500);

        assert!(repo.reset_cursor("u", "d", 3).unwrap());
        assert_eq!(repo.cursor("u", "d").unwrap().unwrap().last_sync_time, 0);
        assert!(!repo.reset_cursor("u", "unknown", 3).unwrap());
    }

    #[test]
    fn test_latest_sync_time_ignores_fresh_cursors() {
        let db = setup();
        let repo = SqliteSyncRepository::new(db.connection());

        repo.get_or_create_cursor("u", "new", 1).unwrap();
        assert_eq!(repo.latest_sync_time("u").unwrap(), None);

        repo.advance_cursor("u", "a", 100, 1).unwrap();
        repo.advance_cursor("u", "b", 200, 1).unwrap();
        assert_eq!(repo.latest_sync_time("u").unwrap(), Some(200));
    }

    #[test]
    fn test_register_device_keeps_registration_time() {
        let db = setup();
        let repo = SqliteSyncRepository::new(db.connection());

        let info = DeviceInfo {
            name: "Laptop".to_string(),
            device_type: "desktop".to_string(),
            platform: "linux".to_string(),
            app_version: "1.0".to_string(),
        };
        repo.register_device(&Device::from_info("u", "d1", &info, 100)).unwrap();
        repo.register_device(&Device::from_info("u", "d1", &DeviceInfo::default(), 200))
            .unwrap();

        let devices = repo.list_devices("u").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Laptop");
        assert_eq!(devices[0].registered_at, 100);
        assert_eq!(devices[0].last_seen, 200);

        // An older sighting never rewinds last_seen
        repo.register_device(&Device::from_info("u", "d1", &DeviceInfo::default(), 150))
            .unwrap();
        assert_eq!(repo.list_devices("u").unwrap()[0].last_seen, 200);
    }

    #[test]
    fn test_conflict_log_round_trip() {
        let db = setup();
        let repo = SqliteSyncRepository::new(db.connection());

        let local = Entity::new("u", "a", EntityPayload::Task(TaskPayload::new("Local")));
        let mut remote = local.clone();
        remote.payload = EntityPayload::Task(TaskPayload::new("Remote"));
        remote.last_modified_device = "b".to_string();

        for resolved_at in [100, 300, 200] {
            let conflict = Conflict {
                id: Uuid::now_v7(),
                user_id: "u".to_string(),
                entity_id: local.id,
                entity_kind: local.kind(),
                local_version: local.clone(),
                remote_version: remote.clone(),
                resolution: Resolution::LastWriteWins,
                winner: ConflictWinner::Remote,
                resolved_at,
            };
            repo.record_conflict(&conflict).unwrap();
        }

        let conflicts = repo.list_conflicts("u", 2).unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].resolved_at, 300);
        assert_eq!(conflicts[0].remote_version, remote);
        assert_eq!(repo.conflict_summary("u").unwrap(), (3, Some(300)));

        let history = repo.conflicts_for_entity("u", &local.id).unwrap();
        assert_eq!(
            history.iter().map(|c| c.resolved_at).collect::<Vec<_>>(),
            vec![100, 200, 300]
        );
        assert!(repo.conflicts_for_entity("other", &local.id).unwrap().is_empty());
        assert_eq!(repo.conflict_summary("other").unwrap(), (0, None));
    }
}
