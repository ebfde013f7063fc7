//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Apply one migration atomically
fn apply(conn: &mut Connection, version: i32, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: server-authoritative entity state and sync bookkeeping
const MIGRATION_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        version INTEGER NOT NULL CHECK (version >= 1),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_modified_device TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        payload TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_entities_user_updated ON entities(user_id, updated_at);

    CREATE TABLE IF NOT EXISTS tombstones (
        entity_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        deleted_at INTEGER NOT NULL,
        device_id TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tombstones_user_deleted ON tombstones(user_id, deleted_at);

    CREATE TABLE IF NOT EXISTS sync_cursors (
        user_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        last_sync_time INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, device_id)
    );

    CREATE TABLE IF NOT EXISTS devices (
        user_id TEXT NOT NULL,
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        device_type TEXT NOT NULL,
        platform TEXT NOT NULL,
        app_version TEXT NOT NULL,
        last_seen INTEGER NOT NULL,
        registered_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, id)
    );

    CREATE TABLE IF NOT EXISTS sync_conflicts (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        entity_kind TEXT NOT NULL,
        local_version TEXT NOT NULL,
        remote_version TEXT NOT NULL,
        resolution TEXT NOT NULL,
        winner TEXT NOT NULL,
        resolved_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_user_resolved ON sync_conflicts(user_id, resolved_at DESC);
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_id);

    CREATE TRIGGER IF NOT EXISTS sync_conflicts_immutable BEFORE UPDATE ON sync_conflicts
    BEGIN
        SELECT RAISE(ABORT, 'sync conflicts are immutable');
    END;
";

/// Version 2: client-side write-ahead operation queue and local state
const MIGRATION_V2: &str = "
    CREATE TABLE IF NOT EXISTS offline_operations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        method TEXT NOT NULL,
        entity_kind TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_offline_operations_status ON offline_operations(status, seq);
    CREATE INDEX IF NOT EXISTS idx_offline_operations_entity ON offline_operations(entity_id, status);

    CREATE TABLE IF NOT EXISTS local_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";
