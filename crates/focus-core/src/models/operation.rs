//! Offline operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{Entity, EntityId, EntityKind};

/// Locally generated, time-ordered operation identifier (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMethod {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} `{other}`", stringify!($ty))),
                }
            }
        }
    };
}

str_enum!(OperationMethod {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

str_enum!(OperationStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

/// Entity an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTarget {
    pub kind: EntityKind,
    pub entity_id: EntityId,
}

/// One pending mutating call, persisted before any network attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineOperation {
    pub id: OperationId,
    pub method: OperationMethod,
    pub target: OperationTarget,
    /// Full entity state for create/update; `None` for delete
    pub payload: Option<Entity>,
    pub retry_count: u32,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub updated_at: i64,
}

impl OfflineOperation {
    fn build(method: OperationMethod, target: OperationTarget, payload: Option<Entity>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: OperationId::new(),
            method,
            target,
            payload,
            retry_count: 0,
            status: OperationStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn create(entity: Entity) -> Self {
        let target = OperationTarget {
            kind: entity.kind(),
            entity_id: entity.id,
        };
        Self::build(OperationMethod::Create, target, Some(entity))
    }

    #[must_use]
    pub fn update(entity: Entity) -> Self {
        let target = OperationTarget {
            kind: entity.kind(),
            entity_id: entity.id,
        };
        Self::build(OperationMethod::Update, target, Some(entity))
    }

    #[must_use]
    pub fn delete(kind: EntityKind, entity_id: EntityId) -> Self {
        Self::build(OperationMethod::Delete, OperationTarget { kind, entity_id }, None)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OperationStatus::Completed | OperationStatus::Failed
        )
    }
}
