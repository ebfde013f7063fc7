//! Sync exchange request/response contract

use serde::{Deserialize, Serialize};

use super::conflict::Conflict;
use super::device::DeviceInfo;
use super::entity::{Entity, EntityId, EntityKind};

/// Tombstone for a deleted entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedItem {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Unix ms
    #[serde(default)]
    pub deleted_at: i64,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub device_id: String,
    /// Unix ms; absent means full resync
    #[serde(default)]
    pub last_sync_time: Option<i64>,
    #[serde(default)]
    pub changed_entities: Vec<Entity>,
    #[serde(default)]
    pub deleted_items: Vec<DeletedItem>,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

impl SyncRequest {
    /// A pull-only exchange
    pub fn pull(device_id: impl Into<String>, last_sync_time: Option<i64>) -> Self {
        Self {
            device_id: device_id.into(),
            last_sync_time,
            changed_entities: Vec::new(),
            deleted_items: Vec::new(),
            device_info: DeviceInfo::default(),
        }
    }
}

/// Per-entity outcome inside an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Created,
    Accepted,
    Unchanged,
    ConflictResolved,
    Deleted,
    Rejected,
}

impl ItemStatus {
    /// The server now holds (or has intentionally discarded) the submitted state.
    pub const fn is_applied(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub status: ItemStatus,
    /// Server-assigned version after the exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    pub const fn applied(entity_id: EntityId, kind: EntityKind, status: ItemStatus, version: Option<i64>) -> Self {
        Self {
            entity_id,
            kind,
            status,
            version,
            error: None,
        }
    }

    pub fn rejected(entity_id: EntityId, kind: EntityKind, error: impl Into<String>) -> Self {
        Self {
            entity_id,
            kind,
            status: ItemStatus::Rejected,
            version: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    /// New cursor value (Unix ms)
    pub last_sync_time: i64,
    #[serde(default)]
    pub changed_entities: Vec<Entity>,
    #[serde(default)]
    pub deleted_items: Vec<DeletedItem>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub conflict_count: usize,
    #[serde(default)]
    pub item_results: Vec<ItemResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncResponse {
    pub fn result_for(&self, entity_id: &EntityId) -> Option<&ItemResult> {
        self.item_results
            .iter()
            .find(|result| &result.entity_id == entity_id)
    }
}

/// Per-user synchronization statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub device_count: usize,
    pub last_sync_time: Option<i64>,
    pub conflicts_total: usize,
    pub last_conflict_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_minimal_body() {
        let request: SyncRequest = serde_json::from_str(r#"{"device_id":"d1"}"#).unwrap();
        assert_eq!(request.device_id, "d1");
        assert!(request.last_sync_time.is_none());
        assert!(request.changed_entities.is_empty());
    }

    #[test]
    fn test_deleted_item_uses_type_field() {
        let item = DeletedItem {
            id: EntityId::new(),
            kind: EntityKind::Session,
            deleted_at: 5,
            device_id: "d".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "session");
    }

    #[test]
    fn test_device_info_uses_type_field() {
        let request: SyncRequest = serde_json::from_str(
            r#"{"device_id":"d1","device_info":{"name":"Laptop","type":"desktop","platform":"linux","app_version":"1.0"}}"#,
        )
        .unwrap();
        assert_eq!(request.device_info.device_type, "desktop");
    }
}
