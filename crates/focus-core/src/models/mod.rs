//! Data models for Focus

mod conflict;
mod device;
mod entity;
mod operation;
mod session;
mod task;
mod wire;

pub use conflict::{Conflict, ConflictWinner, Resolution};
pub use device::{Device, DeviceInfo, SyncCursor};
pub use entity::{Entity, EntityId, EntityKind, EntityPayload};
pub use operation::{
    OfflineOperation, OperationId, OperationMethod, OperationStatus, OperationTarget,
};
pub use session::{SessionPayload, SessionStatus, SessionType};
pub use task::{TaskPayload, TaskPriority, TaskStatus};
pub use wire::{
    DeletedItem, ItemResult, ItemStatus, SyncRequest, SyncResponse, SyncStats,
};
