//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{Entity, EntityId, EntityKind};

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    LastWriteWins,
    Manual,
    Merge,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::Manual => "manual",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "manual" => Ok(Self::Manual),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown resolution `{other}`")),
        }
    }
}

/// Which side's state survived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Remote,
    Merged,
}

impl ConflictWinner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merged => "merged",
        }
    }
}

impl FromStr for ConflictWinner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merged" => Ok(Self::Merged),
            other => Err(format!("unknown conflict winner `{other}`")),
        }
    }
}

/// Immutable record of a resolved concurrent edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict record identifier (UUID v7)
    pub id: Uuid,
    pub user_id: String,
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    /// State submitted by the client
    pub local_version: Entity,
    /// State stored on the server when the conflict was detected
    pub remote_version: Entity,
    pub resolution: Resolution,
    pub winner: ConflictWinner,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
}
