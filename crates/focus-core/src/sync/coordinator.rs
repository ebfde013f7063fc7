//! One sync exchange per (user, device) request.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::config::EngineConfig;
use crate::db::{ConflictLog, CursorStore, DeviceRegistry, EntityRepository};
use crate::error::{Error, Result};
use crate::models::{
    Conflict, DeletedItem, Device, Entity, EntityId, ItemResult, ItemStatus, SyncRequest,
    SyncResponse, SyncStats,
};
use crate::util::{unix_millis_now, user_fingerprint};

use super::notify::{NoopDispatcher, NotificationDispatcher, SyncNotification};
use super::resolver::ConflictResolver;
use super::tracker::ChangeTracker;

/// Result of applying one submitted entity or deletion
struct Applied {
    result: ItemResult,
    conflict: Option<Conflict>,
    /// The client already holds the stored state
    echo: bool,
}

impl Applied {
    const fn stored(result: ItemResult, echo: bool) -> Self {
        Self {
            result,
            conflict: None,
            echo,
        }
    }

    const fn rejected(result: ItemResult) -> Self {
        Self::stored(result, false)
    }
}

/// Largest version a client may submit; keeps version arithmetic far from overflow
pub const MAX_SUBMITTED_VERSION: i64 = 1 << 53;

/// Start times handed to exchanges, and the ones still running
#[derive(Debug, Default)]
struct ExchangeClock {
    last: i64,
    open: BTreeSet<i64>,
}

/// An exchange in progress; deregisters its start time when dropped
struct OpenExchange<'a> {
    clock: &'a Mutex<ExchangeClock>,
    started_at: i64,
}

impl OpenExchange<'_> {
    /// The newest cursor that cannot skip a write from a still-running exchange.
    ///
    /// Writes made by an exchange are stamped at or after its start time, so the
    /// cursor stays below the oldest exchange that is still open.
    fn safe_cursor(&self) -> i64 {
        let clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        match clock.open.first() {
            Some(&oldest) if oldest < self.started_at => oldest - 1,
            _ => self.started_at,
        }
    }
}

impl Drop for OpenExchange<'_> {
    fn drop(&mut self) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.open.remove(&self.started_at);
    }
}

/// Server-side orchestrator for sync exchanges.
///
/// Exchanges for different users and devices run concurrently. Each takes a
/// distinct, increasing start time; contention on a single entity is settled by
/// the version-conditional writes underneath.
pub struct SyncCoordinator<S, N = NoopDispatcher> {
    tracker: ChangeTracker<S>,
    resolver: ConflictResolver,
    notifier: N,
    max_write_attempts: u32,
    clock: Mutex<ExchangeClock>,
}

impl<S> SyncCoordinator<S, NoopDispatcher>
where
    S: EntityRepository + CursorStore + DeviceRegistry + ConflictLog,
{
    pub fn new(store: S, config: &EngineConfig) -> Self {
        Self::with_notifier(store, config, NoopDispatcher)
    }
}

impl<S, N> SyncCoordinator<S, N>
where
    S: EntityRepository + CursorStore + DeviceRegistry + ConflictLog,
    N: NotificationDispatcher,
{
    pub fn with_notifier(store: S, config: &EngineConfig, notifier: N) -> Self {
        Self {
            tracker: ChangeTracker::new(store),
            resolver: ConflictResolver::from_config(config),
            notifier,
            max_write_attempts: config.max_write_attempts.max(1),
            clock: Mutex::new(ExchangeClock::default()),
        }
    }

    pub const fn store(&self) -> &S {
        self.tracker.store()
    }

    /// Run one exchange for `user_id`
    pub fn sync(&self, user_id: &str, request: SyncRequest) -> Result<SyncResponse> {
        let device_id = request.device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(Error::InvalidInput("device_id must not be empty".to_string()));
        }

        let exchange = self.begin_exchange()?;
        let now = exchange.started_at;

        let store = self.store();
        let cursor = store.get_or_create_cursor(user_id, &device_id, now)?;
        store.register_device(&Device::from_info(
            user_id,
            &device_id,
            &request.device_info,
            now,
        ))?;

        // A client never claims more than the server handed it. A cursor at zero
        // (first contact or reset) still trusts the client's bookmark for conflict
        // detection but delivers the full state.
        let requested = request.last_sync_time.unwrap_or(0).max(0);
        let (seen_since, since) = if cursor.last_sync_time > 0 {
            let bounded = requested.min(cursor.last_sync_time);
            (bounded, bounded)
        } else {
            (requested, 0)
        };
        if requested > cursor.last_sync_time && cursor.last_sync_time > 0 {
            tracing::debug!(
                user = user_fingerprint(user_id),
                device = %device_id,
                requested,
                stored = cursor.last_sync_time,
                "Client cursor ahead of stored cursor"
            );
        }

        let mut item_results = Vec::new();
        let mut conflicts = Vec::new();
        let mut echoed: HashSet<EntityId> = HashSet::new();
        let mut deleted_by_client: HashSet<EntityId> = HashSet::new();

        for entity in request.changed_entities {
            let applied = self.apply_change(user_id, &device_id, seen_since, entity, now)?;
            if applied.echo {
                echoed.insert(applied.result.entity_id);
            }
            conflicts.extend(applied.conflict);
            item_results.push(applied.result);
        }

        for item in request.deleted_items {
            let applied = self.apply_deletion(user_id, &device_id, &item, now)?;
            if applied.echo {
                deleted_by_client.insert(applied.result.entity_id);
            }
            item_results.push(applied.result);
        }

        let next_cursor = exchange.safe_cursor();
        let changed_entities: Vec<Entity> = self
            .tracker
            .changes_since(user_id, since)?
            .into_iter()
            .filter(|entity| !echoed.contains(&entity.id))
            .collect();
        let deleted_items: Vec<DeletedItem> = self
            .tracker
            .deletions_since(user_id, since)?
            .into_iter()
            .filter(|item| !deleted_by_client.contains(&item.id))
            .collect();

        store.advance_cursor(user_id, &device_id, next_cursor, now)?;
        drop(exchange);

        let rejected = item_results
            .iter()
            .filter(|result| result.status == ItemStatus::Rejected)
            .count();
        let written = item_results
            .iter()
            .filter(|result| {
                matches!(
                    result.status,
                    ItemStatus::Created | ItemStatus::Accepted | ItemStatus::ConflictResolved
                )
            })
            .count();
        let deletions = deleted_by_client.len();

        if written + deletions > 0 {
            self.dispatch(&SyncNotification {
                user_id: user_id.to_string(),
                source_device: device_id.clone(),
                changed: written,
                deleted: deletions,
                conflicts: conflicts.len(),
            });
        }

        tracing::info!(
            user = user_fingerprint(user_id),
            device = %device_id,
            since,
            submitted = item_results.len(),
            rejected,
            conflicts = conflicts.len(),
            outgoing = changed_entities.len(),
            outgoing_deletions = deleted_items.len(),
            "Sync exchange complete"
        );

        let message = if rejected > 0 {
            Some(format!(
                "{rejected} of {} item(s) rejected",
                item_results.len()
            ))
        } else if conflicts.is_empty() {
            None
        } else {
            Some(format!("{} conflict(s) resolved", conflicts.len()))
        };

        Ok(SyncResponse {
            success: true,
            last_sync_time: next_cursor,
            changed_entities,
            deleted_items,
            conflict_count: conflicts.len(),
            conflicts,
            item_results,
            message,
        })
    }

    /// Devices registered for a user
    pub fn devices(&self, user_id: &str) -> Result<Vec<Device>> {
        self.store().list_devices(user_id)
    }

    /// Recent conflicts for a user, newest first
    pub fn conflicts(&self, user_id: &str, limit: usize) -> Result<Vec<Conflict>> {
        self.store().list_conflicts(user_id, limit)
    }

    pub fn stats(&self, user_id: &str) -> Result<SyncStats> {
        let store = self.store();
        let (conflicts_total, last_conflict_at) = store.conflict_summary(user_id)?;
        Ok(SyncStats {
            device_count: store.list_devices(user_id)?.len(),
            last_sync_time: store.latest_sync_time(user_id)?,
            conflicts_total,
            last_conflict_at,
        })
    }

    /// Force a device's next exchange to be a full resync
    pub fn reset_device(&self, user_id: &str, device_id: &str) -> Result<bool> {
        let reset = self
            .store()
            .reset_cursor(user_id, device_id, unix_millis_now())?;
        if reset {
            tracing::info!(
                user = user_fingerprint(user_id),
                device = %device_id,
                "Reset device sync cursor"
            );
        }
        Ok(reset)
    }

    /// Take a start time after every earlier one and register it as open
    fn begin_exchange(&self) -> Result<OpenExchange<'_>> {
        let mut clock = self.clock.lock().map_err(|_| Error::LockPoisoned)?;
        let started_at = unix_millis_now().max(clock.last.saturating_add(1));
        clock.last = started_at;
        clock.open.insert(started_at);
        Ok(OpenExchange {
            clock: &self.clock,
            started_at,
        })
    }

    /// Notifications run inline on the exchange path; dispatchers must be cheap
    fn dispatch(&self, notification: &SyncNotification) {
        if let Err(error) = self.notifier.notify(notification) {
            tracing::warn!(
                user = user_fingerprint(&notification.user_id),
                "Failed to dispatch sync notification: {error}"
            );
        }
    }

    fn apply_change(
        &self,
        user_id: &str,
        device_id: &str,
        since: i64,
        mut submitted: Entity,
        now: i64,
    ) -> Result<Applied> {
        let id = submitted.id;
        let kind = submitted.kind();

        if submitted.user_id.trim().is_empty() {
            submitted.user_id = user_id.to_string();
        }
        if submitted.user_id != user_id {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                "entity belongs to another user",
            )));
        }
        if submitted.deleted {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                "deletions must be sent as deleted_items",
            )));
        }
        if let Err(reason) = submitted.payload.validate() {
            return Ok(Applied::rejected(ItemResult::rejected(id, kind, reason)));
        }
        if !(1..=MAX_SUBMITTED_VERSION).contains(&submitted.version) {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                format!("version must be between 1 and {MAX_SUBMITTED_VERSION}"),
            )));
        }
        submitted.last_modified_device = device_id.to_string();

        for attempt in 1..=self.max_write_attempts {
            match self.try_apply_change(user_id, device_id, since, &submitted, now) {
                Err(Error::StaleVersion { expected, .. }) => {
                    tracing::debug!(
                        entity = %id,
                        attempt,
                        expected,
                        "Concurrent write detected, re-reading entity"
                    );
                }
                other => return other,
            }
        }

        tracing::warn!(
            entity = %id,
            attempts = self.max_write_attempts,
            "Giving up on contended entity"
        );
        Ok(Applied::rejected(ItemResult::rejected(
            id,
            kind,
            "entity is being modified concurrently, retry later",
        )))
    }

    fn try_apply_change(
        &self,
        user_id: &str,
        device_id: &str,
        since: i64,
        submitted: &Entity,
        now: i64,
    ) -> Result<Applied> {
        let id = submitted.id;
        let kind = submitted.kind();
        let store = self.store();

        if store.tombstone(&id)?.is_some() {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                "entity was deleted",
            )));
        }

        let Some(existing) = store.get(&id)? else {
            let created = self
                .tracker
                .record_creation(submitted.clone(), device_id, now)?;
            return Ok(Applied::stored(
                ItemResult::applied(id, kind, ItemStatus::Created, Some(created.version)),
                true,
            ));
        };

        if existing.user_id != user_id {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                "entity belongs to another user",
            )));
        }
        if existing.deleted {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                "entity was deleted",
            )));
        }
        if existing.kind() != kind {
            return Ok(Applied::rejected(ItemResult::rejected(
                id,
                kind,
                format!("entity is a {}, not a {kind}", existing.kind()),
            )));
        }

        // Resubmission of state the server already holds
        if existing.version >= submitted.version && existing.same_content(submitted) {
            return Ok(Applied::stored(
                ItemResult::applied(id, kind, ItemStatus::Unchanged, Some(existing.version)),
                true,
            ));
        }

        // A retry of a submission that already lost a conflict
        if existing.version >= submitted.version && self.already_resolved(user_id, submitted)? {
            return Ok(Applied::stored(
                ItemResult::applied(id, kind, ItemStatus::Unchanged, Some(existing.version)),
                false,
            ));
        }

        // Untouched since the client last synced, or last touched by this same device
        if existing.updated_at <= since || existing.last_modified_device == device_id {
            let accepted = self.tracker.record_mutation(
                &existing,
                submitted.payload.clone(),
                device_id,
                now,
            )?;
            return Ok(Applied::stored(
                ItemResult::applied(id, kind, ItemStatus::Accepted, Some(accepted.version)),
                true,
            ));
        }

        let outcome = self.resolver.resolve(submitted, &existing, now);
        let stored = self
            .tracker
            .record_resolution(&existing, outcome.entity, now)?;
        self.store().record_conflict(&outcome.conflict)?;

        tracing::info!(
            entity = %id,
            kind = %kind,
            resolution = %outcome.conflict.resolution,
            winner = outcome.conflict.winner.as_str(),
            version = stored.version,
            "Resolved sync conflict"
        );

        Ok(Applied {
            result: ItemResult::applied(
                id,
                kind,
                ItemStatus::ConflictResolved,
                Some(stored.version),
            ),
            conflict: Some(outcome.conflict),
            echo: false,
        })
    }

    fn already_resolved(&self, user_id: &str, submitted: &Entity) -> Result<bool> {
        let history = self.store().conflicts_for_entity(user_id, &submitted.id)?;
        Ok(history.iter().any(|conflict| {
            let loser = &conflict.local_version;
            loser.version == submitted.version
                && loser.last_modified_device == submitted.last_modified_device
                && loser.same_content(submitted)
        }))
    }

    fn apply_deletion(
        &self,
        user_id: &str,
        device_id: &str,
        item: &DeletedItem,
        now: i64,
    ) -> Result<Applied> {
        for attempt in 1..=self.max_write_attempts {
            match self.try_apply_deletion(user_id, device_id, item, now) {
                Err(Error::StaleVersion { .. }) => {
                    tracing::debug!(entity = %item.id, attempt, "Concurrent write during delete");
                }
                other => return other,
            }
        }

        Ok(Applied::rejected(ItemResult::rejected(
            item.id,
            item.kind,
            "entity is being modified concurrently, retry later",
        )))
    }

    fn try_apply_deletion(
        &self,
        user_id: &str,
        device_id: &str,
        item: &DeletedItem,
        now: i64,
    ) -> Result<Applied> {
        let store = self.store();
        let deleted = |version| {
            Applied::stored(
                ItemResult::applied(item.id, item.kind, ItemStatus::Deleted, version),
                true,
            )
        };

        if store.tombstone(&item.id)?.is_some() {
            return Ok(deleted(None));
        }
        let Some(existing) = store.get(&item.id)? else {
            // Never reached the server; nothing to remove
            return Ok(deleted(None));
        };

        if existing.user_id != user_id {
            return Ok(Applied::rejected(ItemResult::rejected(
                item.id,
                item.kind,
                "entity belongs to another user",
            )));
        }
        if existing.kind() != item.kind {
            return Ok(Applied::rejected(ItemResult::rejected(
                item.id,
                item.kind,
                format!("entity is a {}, not a {}", existing.kind(), item.kind),
            )));
        }
        if existing.deleted {
            return Ok(deleted(Some(existing.version)));
        }

        self.tracker.record_deletion(&existing, device_id, now)?;
        let version = existing
            .kind()
            .soft_deletes()
            .then(|| super::tracker::next_version(existing.version));
        Ok(deleted(version))
    }
}
