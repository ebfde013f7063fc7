//! Device registry and sync cursor models

use serde::{Deserialize, Serialize};

/// Device description sent with every sync request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub app_version: String,
}

/// A device registered for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub device_type: String,
    pub platform: String,
    pub app_version: String,
    /// Unix ms
    pub last_seen: i64,
    /// Unix ms
    pub registered_at: i64,
}

impl Device {
    pub fn from_info(user_id: &str, device_id: &str, info: &DeviceInfo, now: i64) -> Self {
        Self {
            id: device_id.to_string(),
            user_id: user_id.to_string(),
            name: info.name.clone(),
            device_type: info.device_type.clone(),
            platform: info.platform.clone(),
            app_version: info.app_version.clone(),
            last_seen: now,
            registered_at: now,
        }
    }
}

/// Per (user, device) bookmark of the last successful exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub user_id: String,
    pub device_id: String,
    /// Exclusive lower bound for "changes since" (Unix ms)
    pub last_sync_time: i64,
    pub updated_at: i64,
}
