//! Synchronizable entity model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::session::SessionPayload;
use super::task::TaskPayload;

/// A unique identifier for an entity, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kinds of entity the sync engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Session,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Session => "session",
        }
    }

    /// Tasks keep a tombstone row; sessions are removed outright.
    pub const fn soft_deletes(self) -> bool {
        matches!(self, Self::Task)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown entity kind `{other}`")),
        }
    }
}

/// Typed domain payload of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EntityPayload {
    Task(TaskPayload),
    Session(SessionPayload),
}

impl EntityPayload {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Task(_) => EntityKind::Task,
            Self::Session(_) => EntityKind::Session,
        }
    }

    /// Check domain rules for the payload.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Task(task) => task.validate(),
            Self::Session(session) => session.validate(),
        }
    }
}

/// A synchronizable domain object (task or pomodoro session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, never reused
    pub id: EntityId,
    /// Owning user
    pub user_id: String,
    /// Monotonic version, starts at 1
    pub version: i64,
    /// Creation timestamp (Unix ms)
    #[serde(default)]
    pub created_at: i64,
    /// Last mutation timestamp (Unix ms); `<= 0` means unknown
    #[serde(default)]
    pub updated_at: i64,
    /// Device that performed the last accepted mutation
    #[serde(default)]
    pub last_modified_device: String,
    /// Soft delete flag for sync
    #[serde(default)]
    pub deleted: bool,
    /// Domain fields
    pub payload: EntityPayload,
}

impl Entity {
    /// Create a fresh entity at version 1
    #[must_use]
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>, payload: EntityPayload) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: EntityId::new(),
            user_id: user_id.into(),
            version: 1,
            created_at: now,
            updated_at: now,
            last_modified_device: device_id.into(),
            deleted: false,
            payload,
        }
    }

    pub const fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// Whether `updated_at` carries a usable timestamp
    pub const fn has_timestamp(&self) -> bool {
        self.updated_at > 0
    }

    /// Same user-visible state, ignoring version bookkeeping
    pub fn same_content(&self, other: &Self) -> bool {
        self.deleted == other.deleted && self.payload == other.payload
    }
}
