//! Client-local key/value state (sync cursor, device identity)

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Key under which the client keeps its last server cursor
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Key under which the client keeps its generated device id
pub const DEVICE_ID_KEY: &str = "device_id";

/// Set when the next pull must fetch the full server state
pub const RESYNC_PENDING_KEY: &str = "resync_pending";

/// Trait for small client-side settings
pub trait LocalStateRepository {
    fn get_value(&self, key: &str) -> Result<Option<String>>;

    fn set_value(&self, key: &str, value: &str) -> Result<()>;

    /// Last acknowledged server cursor, if any
    fn last_sync_time(&self) -> Result<Option<i64>> {
        Ok(self
            .get_value(LAST_SYNC_TIME_KEY)?
            .and_then(|value| value.parse().ok()))
    }

    fn set_last_sync_time(&self, value: i64) -> Result<()> {
        self.set_value(LAST_SYNC_TIME_KEY, &value.to_string())
    }

    fn resync_pending(&self) -> Result<bool> {
        Ok(self.get_value(RESYNC_PENDING_KEY)?.as_deref() == Some("1"))
    }

    fn set_resync_pending(&self, pending: bool) -> Result<()> {
        self.set_value(RESYNC_PENDING_KEY, if pending { "1" } else { "0" })
    }
}

/// `SQLite` implementation of `LocalStateRepository`
pub struct SqliteLocalStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteLocalStateRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl LocalStateRepository for SqliteLocalStateRepository<'_> {
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO local_state (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}
