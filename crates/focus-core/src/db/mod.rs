//! Database layer for Focus sync

mod connection;
mod entity_repository;
mod local_state_repository;
mod migrations;
mod operation_repository;
mod sync_repository;

pub use connection::Database;
pub use entity_repository::{EntityRepository, SqliteEntityRepository};
pub use local_state_repository::{
    LocalStateRepository, SqliteLocalStateRepository, DEVICE_ID_KEY, LAST_SYNC_TIME_KEY,
    RESYNC_PENDING_KEY,
};
pub use operation_repository::{OperationRepository, SqliteOperationRepository};
pub use sync_repository::{ConflictLog, CursorStore, DeviceRegistry, SqliteSyncRepository};

use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use std::str::FromStr;

/// Parse a TEXT column through `FromStr`
pub(crate) fn text_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

/// Decode a JSON TEXT column
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}
