//! Conflict resolution for concurrent edits.
//!
//! The resolver is pure: it never touches storage and never fails. Anything it
//! cannot decide falls back to the server copy and is recorded as `manual`.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::tracker::next_version;
use super::ConflictStrategy;
use crate::config::EngineConfig;
use crate::models::{Conflict, ConflictWinner, Entity, EntityKind, EntityPayload, Resolution};

/// Outcome of resolving one conflicting pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConflict {
    /// State to persist
    pub entity: Entity,
    /// Audit record referencing both inputs
    pub conflict: Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Picks a winner between a client-submitted and a server-stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictResolver {
    task_strategy: ConflictStrategy,
    session_strategy: ConflictStrategy,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictStrategy::LastWriteWins, ConflictStrategy::LastWriteWins)
    }
}

impl ConflictResolver {
    pub const fn new(task_strategy: ConflictStrategy, session_strategy: ConflictStrategy) -> Self {
        Self {
            task_strategy,
            session_strategy,
        }
    }

    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.task_strategy, config.session_strategy)
    }

    pub const fn strategy_for(&self, kind: EntityKind) -> ConflictStrategy {
        match kind {
            EntityKind::Task => self.task_strategy,
            EntityKind::Session => self.session_strategy,
        }
    }

    /// Resolve `local` (client-submitted) against `remote` (server-stored)
    pub fn resolve(&self, local: &Entity, remote: &Entity, resolved_at: i64) -> ResolvedConflict {
        if !local.has_timestamp() || !remote.has_timestamp() {
            tracing::warn!(
                entity = %remote.id,
                local_updated_at = local.updated_at,
                remote_updated_at = remote.updated_at,
                "Conflict without usable timestamps, keeping server copy"
            );
            return keep_remote(local, remote, resolved_at);
        }

        match self.strategy_for(remote.kind()) {
            ConflictStrategy::LastWriteWins => last_write_wins(local, remote, resolved_at),
            ConflictStrategy::FieldMerge => field_merge(local, remote, resolved_at),
            ConflictStrategy::Manual => keep_remote(local, remote, resolved_at),
        }
    }
}

/// Later timestamp, then higher version, then the server
fn lww_side(local: &Entity, remote: &Entity) -> Side {
    match local.updated_at.cmp(&remote.updated_at) {
        std::cmp::Ordering::Greater => Side::Local,
        std::cmp::Ordering::Less => Side::Remote,
        std::cmp::Ordering::Equal if local.version > remote.version => Side::Local,
        std::cmp::Ordering::Equal => Side::Remote,
    }
}

fn resolved_version(local: &Entity, remote: &Entity) -> i64 {
    next_version(local.version.max(remote.version))
}

fn last_write_wins(local: &Entity, remote: &Entity, resolved_at: i64) -> ResolvedConflict {
    let (winner, side) = match lww_side(local, remote) {
        Side::Local => (local, ConflictWinner::Local),
        Side::Remote => (remote, ConflictWinner::Remote),
    };

    let mut entity = remote.clone();
    entity.payload = winner.payload.clone();
    entity.deleted = winner.deleted;
    entity.updated_at = winner.updated_at;
    entity.last_modified_device.clone_from(&winner.last_modified_device);
    entity.version = resolved_version(local, remote);

    finish(local, remote, entity, Resolution::LastWriteWins, side, resolved_at)
}

fn keep_remote(local: &Entity, remote: &Entity, resolved_at: i64) -> ResolvedConflict {
    let mut entity = remote.clone();
    entity.version = resolved_version(local, remote);
    finish(local, remote, entity, Resolution::Manual, ConflictWinner::Remote, resolved_at)
}

fn field_merge(local: &Entity, remote: &Entity, resolved_at: i64) -> ResolvedConflict {
    let Some(payload) = merge_payloads(local, remote) else {
        tracing::warn!(
            entity = %remote.id,
            "Field merge not possible, keeping server copy"
        );
        return keep_remote(local, remote, resolved_at);
    };

    let lww = match lww_side(local, remote) {
        Side::Local => local,
        Side::Remote => remote,
    };

    let mut entity = remote.clone();
    entity.payload = payload;
    entity.updated_at = local.updated_at.max(remote.updated_at);
    entity.last_modified_device.clone_from(&lww.last_modified_device);
    entity.version = resolved_version(local, remote);

    finish(local, remote, entity, Resolution::Merge, ConflictWinner::Merged, resolved_at)
}

/// Per-field merge of two payloads of the same kind.
///
/// A field set on only one side is taken from that side. A field set on both
/// sides with different values takes the last-write-wins side's value.
fn merge_payloads(local: &Entity, remote: &Entity) -> Option<EntityPayload> {
    if local.kind() != remote.kind() {
        return None;
    }

    let mut local_value = serde_json::to_value(&local.payload).ok()?;
    let remote_value = serde_json::to_value(&remote.payload).ok()?;
    let prefer_local = lww_side(local, remote) == Side::Local;

    let local_fields = local_value.get_mut("data")?.as_object_mut()?;
    let remote_fields = remote_value.get("data")?.as_object()?;

    let mut merged = Map::new();
    for key in local_fields.keys().chain(remote_fields.keys()) {
        if merged.contains_key(key) {
            continue;
        }
        let ours = local_fields.get(key).unwrap_or(&Value::Null);
        let theirs = remote_fields.get(key).unwrap_or(&Value::Null);
        let value = match (ours.is_null(), theirs.is_null()) {
            (false, true) => ours,
            (true, false) => theirs,
            _ if prefer_local => ours,
            _ => theirs,
        };
        merged.insert(key.clone(), value.clone());
    }
    *local_fields = merged;

    serde_json::from_value(local_value).ok()
}

fn finish(
    local: &Entity,
    remote: &Entity,
    entity: Entity,
    resolution: Resolution,
    winner: ConflictWinner,
    resolved_at: i64,
) -> ResolvedConflict {
    let conflict = Conflict {
        id: Uuid::now_v7(),
        user_id: remote.user_id.clone(),
        entity_id: remote.id,
        entity_kind: remote.kind(),
        local_version: local.clone(),
        remote_version: remote.clone(),
        resolution,
        winner,
        resolved_at,
    };
    ResolvedConflict { entity, conflict }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionPayload, SessionType, TaskPayload, TaskPriority};
    use pretty_assertions::assert_eq;

    fn task_pair() -> (Entity, Entity) {
        let mut remote = Entity::new("u", "device-b", EntityPayload::Task(TaskPayload::new("Remote")));
        remote.version = 2;
        remote.updated_at = 2_000;

        let mut local = remote.clone();
        local.version = 1;
        local.updated_at = 1_000;
        local.last_modified_device = "device-a".to_string();
        local.payload = EntityPayload::Task(TaskPayload::new("Local"));
        (local, remote)
    }

    #[test]
    fn later_timestamp_wins() {
        let (local, remote) = task_pair();
        let outcome = ConflictResolver::default().resolve(&local, &remote, 5_000);

        assert_eq!(outcome.entity.payload, remote.payload);
        assert_eq!(outcome.entity.version, 3);
        assert_eq!(outcome.entity.last_modified_device, "device-b");
        assert_eq!(outcome.conflict.winner, ConflictWinner::Remote);
        assert_eq!(outcome.conflict.resolution, Resolution::LastWriteWins);
        assert_eq!(outcome.conflict.local_version, local);
        assert_eq!(outcome.conflict.remote_version, remote);
        assert_eq!(outcome.conflict.resolved_at, 5_000);
    }

    #[test]
    fn local_wins_when_newer() {
        let (mut local, remote) = task_pair();
        local.updated_at = 3_000;
        let outcome = ConflictResolver::default().resolve(&local, &remote, 5_000);

        assert_eq!(outcome.entity.payload, local.payload);
        assert_eq!(outcome.entity.last_modified_device, "device-a");
        assert_eq!(outcome.conflict.winner, ConflictWinner::Local);
        assert!(outcome.entity.version > local.version.max(remote.version));
    }

    #[test]
    fn tie_breaks_on_version_then_server() {
        let (mut local, mut remote) = task_pair();
        local.updated_at = 2_000;
        local.version = 4;
        let outcome = ConflictResolver::default().resolve(&local, &remote, 1);
        assert_eq!(outcome.conflict.winner, ConflictWinner::Local);
        assert_eq!(outcome.entity.version, 5);

        remote.version = 4;
        let outcome = ConflictResolver::default().resolve(&local, &remote, 1);
        assert_eq!(outcome.conflict.winner, ConflictWinner::Remote);
    }

    #[test]
    fn resolution_is_deterministic() {
        let (local, remote) = task_pair();
        let resolver = ConflictResolver::default();
        let first = resolver.resolve(&local, &remote, 10);
        for _ in 0..10 {
            let again = resolver.resolve(&local, &remote, 10);
            assert_eq!(again.entity, first.entity);
            assert_eq!(again.conflict.winner, first.conflict.winner);
        }
    }

    #[test]
    fn missing_timestamp_fails_closed_to_manual() {
        let (mut local, remote) = task_pair();
        local.updated_at = 0;
        local.version = 9;
        let outcome = ConflictResolver::default().resolve(&local, &remote, 1);

        assert_eq!(outcome.entity.payload, remote.payload);
        assert_eq!(outcome.entity.version, 10);
        assert_eq!(outcome.conflict.resolution, Resolution::Manual);
        assert_eq!(outcome.conflict.winner, ConflictWinner::Remote);
    }

    #[test]
    fn manual_strategy_keeps_server_copy() {
        let (mut local, remote) = task_pair();
        local.updated_at = 9_000;
        let resolver = ConflictResolver::new(ConflictStrategy::Manual, ConflictStrategy::LastWriteWins);
        let outcome = resolver.resolve(&local, &remote, 1);

        assert_eq!(outcome.entity.payload, remote.payload);
        assert_eq!(outcome.entity.version, 3);
        assert_eq!(outcome.conflict.resolution, Resolution::Manual);
    }

    #[test]
    fn field_merge_keeps_one_sided_fields() {
        let (mut local, mut remote) = task_pair();
        let mut local_task = TaskPayload::new("Local title");
        local_task.description = Some("Written offline".to_string());
        local.payload = EntityPayload::Task(local_task);

        let mut remote_task = TaskPayload::new("Remote title");
        remote_task.priority = TaskPriority::High;
        remote_task.due_date = Some(42);
        remote.payload = EntityPayload::Task(remote_task);

        let resolver = ConflictResolver::new(ConflictStrategy::FieldMerge, ConflictStrategy::LastWriteWins);
        let outcome = resolver.resolve(&local, &remote, 1);

        let EntityPayload::Task(merged) = &outcome.entity.payload else {
            panic!("expected task payload");
        };
        // Remote is newer, so it wins the contested fields
        assert_eq!(merged.title, "Remote title");
        assert_eq!(merged.priority, TaskPriority::High);
        assert_eq!(merged.due_date, Some(42));
        assert_eq!(merged.description.as_deref(), Some("Written offline"));
        assert_eq!(outcome.conflict.resolution, Resolution::Merge);
        assert_eq!(outcome.conflict.winner, ConflictWinner::Merged);
        assert_eq!(outcome.entity.version, 3);
    }

    #[test]
    fn field_merge_across_kinds_fails_closed() {
        let (mut local, remote) = task_pair();
        local.payload = EntityPayload::Session(SessionPayload::start(None, SessionType::Work, 60));
        let resolver = ConflictResolver::new(ConflictStrategy::FieldMerge, ConflictStrategy::FieldMerge);
        let outcome = resolver.resolve(&local, &remote, 1);

        assert_eq!(outcome.entity.payload, remote.payload);
        assert_eq!(outcome.conflict.resolution, Resolution::Manual);
    }
}
