//! Change notifications for a user's other devices.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::util::user_fingerprint;

/// Summary of what one exchange changed on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncNotification {
    pub user_id: String,
    /// Device whose exchange produced the changes
    pub source_device: String,
    pub changed: usize,
    pub deleted: usize,
    pub conflicts: usize,
}

/// Delivers "data changed" hints to a user's other devices.
///
/// Delivery is best effort. The coordinator logs and ignores errors.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notification: &SyncNotification) -> Result<()>;
}

/// Dispatcher that only writes a log line
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl NotificationDispatcher for LoggingDispatcher {
    fn notify(&self, notification: &SyncNotification) -> Result<()> {
        tracing::info!(
            user = user_fingerprint(&notification.user_id),
            source_device = %notification.source_device,
            changed = notification.changed,
            deleted = notification.deleted,
            conflicts = notification.conflicts,
            "Sync changes ready for other devices"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl NotificationDispatcher for NoopDispatcher {
    fn notify(&self, _notification: &SyncNotification) -> Result<()> {
        Ok(())
    }
}

impl<T: NotificationDispatcher + ?Sized> NotificationDispatcher for std::sync::Arc<T> {
    fn notify(&self, notification: &SyncNotification) -> Result<()> {
        (**self).notify(notification)
    }
}
