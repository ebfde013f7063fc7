//! focus-core - Core library for Focus
//!
//! This crate contains the shared models, storage layer and the offline-first
//! sync engine used by the Focus API server and CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod offline;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{ConfigError, EngineConfig};
pub use error::{Error, Result};
pub use models::{Entity, EntityId, EntityKind, EntityPayload};
pub use offline::{ConnectivityMonitor, OfflineOperationQueue, SyncAgent};
pub use services::DatabaseService;
pub use sync::{ChangeTracker, ConflictResolver, ConflictStrategy, SyncCoordinator};
