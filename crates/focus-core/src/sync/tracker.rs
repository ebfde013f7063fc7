//! Version and change tracking on top of an `EntityRepository`.

use crate::db::EntityRepository;
use crate::error::{Error, Result};
use crate::models::{DeletedItem, Entity, EntityPayload};

/// The version that follows `current`
pub const fn next_version(current: i64) -> i64 {
    current.saturating_add(1)
}

/// A write timestamp that is never at or before the previous one
pub fn next_timestamp(now: i64, previous: i64) -> i64 {
    now.max(previous.saturating_add(1))
}

/// Stamps versions and timestamps on every accepted mutation.
///
/// All replacing writes are conditional on the version that was read; losing a
/// race surfaces as [`Error::StaleVersion`] so the caller can re-read and retry.
pub struct ChangeTracker<R> {
    store: R,
}

impl<R: EntityRepository> ChangeTracker<R> {
    pub const fn new(store: R) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &R {
        &self.store
    }

    /// Store a brand new entity at version 1, whatever version was submitted
    pub fn record_creation(&self, mut entity: Entity, device_id: &str, now: i64) -> Result<Entity> {
        entity.version = 1;
        if entity.created_at <= 0 {
            entity.created_at = now;
        }
        entity.updated_at = now;
        entity.last_modified_device = device_id.to_string();
        entity.deleted = false;

        if !self.store.insert(&entity)? {
            return Err(stale(&entity, 0));
        }
        Ok(entity)
    }

    /// Replace the payload of `current`, bumping its version by exactly one
    pub fn record_mutation(
        &self,
        current: &Entity,
        payload: EntityPayload,
        device_id: &str,
        now: i64,
    ) -> Result<Entity> {
        let mut next = current.clone();
        next.payload = payload;
        next.version = next_version(current.version);
        next.updated_at = next_timestamp(now, current.updated_at);
        next.last_modified_device = device_id.to_string();

        if !self.store.compare_and_swap(&next, current.version)? {
            return Err(stale(current, current.version));
        }
        Ok(next)
    }

    /// Persist a resolver outcome over `current`
    pub fn record_resolution(&self, current: &Entity, mut resolved: Entity, now: i64) -> Result<Entity> {
        resolved.version = resolved.version.max(next_version(current.version));
        resolved.updated_at = next_timestamp(now, current.updated_at);
        resolved.created_at = current.created_at;
        resolved.user_id.clone_from(&current.user_id);

        if !self.store.compare_and_swap(&resolved, current.version)? {
            return Err(stale(current, current.version));
        }
        Ok(resolved)
    }

    /// Delete `current` and write its tombstone
    ///
    /// Tasks keep a soft-deleted row; sessions are removed.
    pub fn record_deletion(&self, current: &Entity, device_id: &str, now: i64) -> Result<DeletedItem> {
        let tombstone = DeletedItem {
            id: current.id,
            kind: current.kind(),
            deleted_at: next_timestamp(now, current.updated_at),
            device_id: device_id.to_string(),
        };

        let applied = if current.kind().soft_deletes() {
            let mut deleted = current.clone();
            deleted.deleted = true;
            deleted.version = next_version(current.version);
            deleted.updated_at = tombstone.deleted_at;
            deleted.last_modified_device = device_id.to_string();
            self.store.soft_delete(&deleted, current.version, &tombstone)?
        } else {
            self.store
                .hard_delete(&current.user_id, &current.id, current.version, &tombstone)?
        };

        if !applied {
            return Err(stale(current, current.version));
        }
        Ok(tombstone)
    }

    /// Live entities changed after `since`, oldest first
    pub fn changes_since(&self, user_id: &str, since: i64) -> Result<Vec<Entity>> {
        self.store.changed_since(user_id, since)
    }

    /// Deletions recorded after `since`, oldest first
    pub fn deletions_since(&self, user_id: &str, since: i64) -> Result<Vec<DeletedItem>> {
        self.store.deleted_since(user_id, since)
    }
}

fn stale(entity: &Entity, expected: i64) -> Error {
    Error::StaleVersion {
        entity_id: entity.id.to_string(),
        expected,
    }
}
