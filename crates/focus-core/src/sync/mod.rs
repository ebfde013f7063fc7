//! Server-side sync engine: version tracking, conflict resolution and the
//! per-device exchange coordinator.

mod coordinator;
mod notify;
mod resolver;
mod tracker;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use coordinator::SyncCoordinator;
pub use notify::{LoggingDispatcher, NoopDispatcher, NotificationDispatcher, SyncNotification};
pub use resolver::{ConflictResolver, ResolvedConflict};
pub use tracker::{next_timestamp, next_version, ChangeTracker};

/// Conflict policy, selected per entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Later `updated_at` wins, then higher version, then the server copy
    LastWriteWins,
    /// Field-by-field merge; conflicting fields fall back to last-write-wins
    FieldMerge,
    /// Keep the server copy and flag the conflict for follow-up
    Manual,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "lww",
            Self::FieldMerge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lww" | "last_write_wins" | "last-write-wins" => Ok(Self::LastWriteWins),
            "merge" | "field_merge" | "field-merge" => Ok(Self::FieldMerge),
            "manual" => Ok(Self::Manual),
            other => Err(format!(
                "unknown conflict strategy `{other}` (expected lww, merge or manual)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("LWW".parse(), Ok(ConflictStrategy::LastWriteWins));
        assert_eq!("field-merge".parse(), Ok(ConflictStrategy::FieldMerge));
        assert_eq!(" manual ".parse(), Ok(ConflictStrategy::Manual));
        assert!("crdt".parse::<ConflictStrategy>().is_err());
    }
}
