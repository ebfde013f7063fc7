//! Client side of the sync engine.
//!
//! Local edits are applied to the local store first, then queued. When the
//! server is reachable the queue is replayed in order, one operation per
//! exchange, and server changes are pulled into the local store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::db::{EntityRepository, LocalStateRepository, OperationRepository};
use crate::error::{Error, Result};
use crate::models::{
    DeletedItem, DeviceInfo, Entity, EntityId, EntityKind, EntityPayload, ItemStatus,
    OfflineOperation, OperationMethod, OperationStatus, SessionPayload, SyncRequest, SyncResponse,
    TaskPayload,
};
use crate::sync::ChangeTracker;
use crate::util::unix_millis_now;

use super::connectivity::{ConnectivityMonitor, ReconnectHandler};
use super::queue::OfflineOperationQueue;
use super::transport::{SyncTransport, TransportError};

/// Who the agent syncs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_id: String,
    pub device_id: String,
    pub device_info: DeviceInfo,
}

impl ClientIdentity {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            device_info: DeviceInfo::default(),
        }
    }

    #[must_use]
    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }
}

/// Outcome of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub completed: usize,
    /// Operations that reached `failed` during this pass
    pub failed: usize,
    /// Transient failures that left the operation pending
    pub retried: usize,
    /// The pass stopped because the server became unreachable
    pub interrupted: bool,
}

impl ReplayReport {
    pub const fn is_empty(&self) -> bool {
        self.completed == 0 && self.failed == 0 && self.retried == 0
    }
}

/// Outcome of applying one server response locally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Server entities written to the local store
    pub received: usize,
    /// Local entities removed because the server deleted them
    pub removed: usize,
    /// Server changes held back because local operations are still queued
    pub skipped: usize,
    pub conflicts: usize,
    pub last_sync_time: i64,
}

enum Delivery {
    Applied(SyncResponse),
    /// The operation can never succeed
    Rejected(String),
    /// Retry later
    Transient(TransportError),
    /// Stop the pass without charging the operation an attempt
    Halt(TransportError),
}

/// Offline-first client: local store, operation queue and sync transport.
pub struct SyncAgent<S, T> {
    store: S,
    tracker: ChangeTracker<S>,
    queue: OfflineOperationQueue<S>,
    transport: T,
    monitor: Arc<ConnectivityMonitor>,
    identity: ClientIdentity,
    config: EngineConfig,
    replay_lock: Mutex<()>,
}

impl<S, T> SyncAgent<S, T>
where
    S: EntityRepository + OperationRepository + LocalStateRepository + Clone + Send + Sync,
    T: SyncTransport,
{
    /// Build an agent, recovering operations a previous run left in flight
    pub fn new(
        store: S,
        transport: T,
        monitor: Arc<ConnectivityMonitor>,
        identity: ClientIdentity,
        config: EngineConfig,
    ) -> Result<Self> {
        if identity.user_id.trim().is_empty() || identity.device_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "user id and device id must not be empty".to_string(),
            ));
        }

        let queue = OfflineOperationQueue::from_config(store.clone(), &config);
        queue.recover_in_flight()?;
        queue.purge_completed()?;

        Ok(Self {
            tracker: ChangeTracker::new(store.clone()),
            queue,
            store,
            transport,
            monitor,
            identity,
            config,
            replay_lock: Mutex::new(()),
        })
    }

    pub const fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub const fn queue(&self) -> &OfflineOperationQueue<S> {
        &self.queue
    }

    pub const fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Live local entities, newest first
    pub fn list(&self, kind: Option<EntityKind>) -> Result<Vec<Entity>> {
        self.store.list(&self.identity.user_id, kind)
    }

    /// A live local entity
    pub fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.store.get(id)?.filter(|entity| !entity.deleted))
    }

    pub fn last_sync_time(&self) -> Result<Option<i64>> {
        self.store.last_sync_time()
    }

    pub async fn create_task(&self, task: TaskPayload) -> Result<Entity> {
        self.create(EntityPayload::Task(task)).await
    }

    pub async fn create_session(&self, session: SessionPayload) -> Result<Entity> {
        self.create(EntityPayload::Session(session)).await
    }

    /// Create an entity locally and queue it for the server
    pub async fn create(&self, payload: EntityPayload) -> Result<Entity> {
        payload.validate().map_err(Error::InvalidInput)?;

        let draft = Entity::new(&self.identity.user_id, &self.identity.device_id, payload);
        let entity =
            self.tracker
                .record_creation(draft, &self.identity.device_id, unix_millis_now())?;
        self.queue.enqueue(&OfflineOperation::create(entity.clone()))?;

        self.replay_if_online().await;
        Ok(entity)
    }

    /// Replace the payload of a live local entity and queue the change
    pub async fn update(&self, id: &EntityId, payload: EntityPayload) -> Result<Entity> {
        payload.validate().map_err(Error::InvalidInput)?;

        let current = self.live_entity(id)?;
        if current.kind() != payload.kind() {
            return Err(Error::InvalidInput(format!(
                "cannot replace a {} with a {}",
                current.kind(),
                payload.kind()
            )));
        }

        let updated = self.tracker.record_mutation(
            &current,
            payload,
            &self.identity.device_id,
            unix_millis_now(),
        )?;
        self.queue.enqueue(&OfflineOperation::update(updated.clone()))?;

        self.replay_if_online().await;
        Ok(updated)
    }

    /// Delete a live local entity and queue the deletion
    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        let current = self.live_entity(id)?;
        self.tracker
            .record_deletion(&current, &self.identity.device_id, unix_millis_now())?;
        self.queue
            .enqueue(&OfflineOperation::delete(current.kind(), current.id))?;

        self.replay_if_online().await;
        Ok(())
    }

    fn live_entity(&self, id: &EntityId) -> Result<Entity> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    async fn replay_if_online(&self) {
        if !self.monitor.is_online() {
            return;
        }
        if let Err(error) = self.replay().await {
            tracing::warn!("Replay after local edit failed: {error}");
        }
    }

    /// Deliver queued operations in order until the queue drains or the
    /// server becomes unreachable.
    pub async fn replay(&self) -> Result<ReplayReport> {
        let _guard = self.replay_lock.lock().await;
        let mut report = ReplayReport::default();

        loop {
            if !self.monitor.is_online() {
                report.interrupted = true;
                break;
            }
            let Some(mut operation) = self.queue.dequeue_next()? else {
                break;
            };

            match self.deliver(&operation).await? {
                Delivery::Applied(response) => {
                    self.queue.mark_completed(&mut operation)?;
                    report.completed += 1;
                    self.apply_response(&response)?;
                }
                Delivery::Rejected(reason) => {
                    self.queue.mark_failed(&mut operation, &reason, true)?;
                    report.failed += 1;
                    self.after_terminal_failure()?;
                }
                Delivery::Transient(error) => {
                    if error.is_connectivity() {
                        self.monitor.observe(false);
                    }
                    let status = self
                        .queue
                        .mark_failed(&mut operation, &error.to_string(), false)?;
                    if status == OperationStatus::Failed {
                        report.failed += 1;
                        self.after_terminal_failure()?;
                    } else {
                        report.retried += 1;
                        if !self.config.replay_backoff.is_zero() {
                            tokio::time::sleep(self.config.replay_backoff).await;
                        }
                    }
                }
                Delivery::Halt(error) => {
                    self.queue.release(&mut operation)?;
                    tracing::warn!("Replay halted: {error}");
                    return Err(error.into());
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                completed = report.completed,
                failed = report.failed,
                retried = report.retried,
                interrupted = report.interrupted,
                "Offline replay finished"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, operation: &OfflineOperation) -> Result<Delivery> {
        let mut request = self.request()?;
        match operation.method {
            OperationMethod::Create | OperationMethod::Update => match &operation.payload {
                Some(entity) => request.changed_entities.push(entity.clone()),
                None => return Ok(Delivery::Rejected("operation has no payload".to_string())),
            },
            OperationMethod::Delete => request.deleted_items.push(DeletedItem {
                id: operation.target.entity_id,
                kind: operation.target.kind,
                deleted_at: operation.created_at,
                device_id: self.identity.device_id.clone(),
            }),
        }

        let response = match self.exchange(request).await {
            Ok(response) => response,
            Err(error @ TransportError::Rejected { status: 401 | 403, .. }) => {
                return Ok(Delivery::Halt(error));
            }
            Err(error) if error.is_transient() => return Ok(Delivery::Transient(error)),
            Err(error) => return Ok(Delivery::Rejected(error.to_string())),
        };

        let delivery = match response.result_for(&operation.target.entity_id) {
            None => Delivery::Transient(TransportError::Decode(format!(
                "no result for entity {}",
                operation.target.entity_id
            ))),
            Some(result) if result.status == ItemStatus::Rejected => Delivery::Rejected(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "rejected by server".to_string()),
            ),
            Some(_) => Delivery::Applied(response),
        };
        Ok(delivery)
    }

    /// A failed operation may leave local state the server never accepted.
    /// The next pull fetches the full server state; the rest of the current
    /// pass keeps the real cursor.
    fn after_terminal_failure(&self) -> Result<()> {
        self.store.set_resync_pending(true)
    }

    /// Pull server changes since the local cursor, or everything after a
    /// terminal replay failure
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _guard = self.replay_lock.lock().await;

        let full_resync = self.store.resync_pending()?;
        let mut request = self.request()?;
        if full_resync {
            request.last_sync_time = None;
        }
        let response = match self.exchange(request).await {
            Ok(response) => response,
            Err(error) => {
                if error.is_connectivity() {
                    self.monitor.observe(false);
                }
                return Err(error.into());
            }
        };
        self.monitor.observe(true);

        let report = self.apply_response(&response)?;
        if full_resync && report.skipped == 0 {
            self.store.set_resync_pending(false)?;
        }
        tracing::info!(
            full_resync,
            received = report.received,
            removed = report.removed,
            skipped = report.skipped,
            conflicts = report.conflicts,
            "Pulled server changes"
        );
        Ok(report)
    }

    /// Replay the queue, then pull if the replay ran to completion
    pub async fn resume(&self) -> Result<(ReplayReport, Option<SyncReport>)> {
        let replay = self.replay().await?;
        if replay.interrupted {
            return Ok((replay, None));
        }
        let pulled = self.sync_now().await?;
        Ok((replay, Some(pulled)))
    }

    fn request(&self) -> Result<SyncRequest> {
        let mut request = SyncRequest::pull(&self.identity.device_id, self.store.last_sync_time()?);
        request.device_info = self.identity.device_info.clone();
        Ok(request)
    }

    async fn exchange(&self, request: SyncRequest) -> std::result::Result<SyncResponse, TransportError> {
        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, self.transport.exchange(request))
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout)))
    }

    /// Merge a server response into the local store.
    ///
    /// Entities with queued operations keep their local state; the cursor
    /// only advances when nothing was held back.
    fn apply_response(&self, response: &SyncResponse) -> Result<SyncReport> {
        let mut report = SyncReport {
            conflicts: response.conflict_count,
            last_sync_time: response.last_sync_time,
            ..SyncReport::default()
        };

        for entity in &response.changed_entities {
            if self.store.has_unfinished_for(&entity.id)? {
                report.skipped += 1;
                continue;
            }
            self.store.upsert(entity)?;
            report.received += 1;
        }

        for item in &response.deleted_items {
            if self.store.has_unfinished_for(&item.id)? {
                report.skipped += 1;
                continue;
            }
            if self.store.purge(&item.id)? {
                report.removed += 1;
            }
        }

        for result in &response.item_results {
            let (true, Some(version)) = (result.status.is_applied(), result.version) else {
                continue;
            };
            if self.store.has_unfinished_for(&result.entity_id)? {
                continue;
            }
            if let Some(mut local) = self.store.get(&result.entity_id)? {
                if !local.deleted && local.version < version {
                    local.version = version;
                    self.store.upsert(&local)?;
                }
            }
        }

        if report.skipped == 0 {
            self.store.set_last_sync_time(response.last_sync_time)?;
        }
        Ok(report)
    }
}

#[async_trait]
impl<S, T> ReconnectHandler for SyncAgent<S, T>
where
    S: EntityRepository + OperationRepository + LocalStateRepository + Clone + Send + Sync,
    T: SyncTransport,
{
    async fn on_reconnect(&self) {
        if let Err(error) = self.resume().await {
            tracing::warn!("Sync after reconnect failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::offline::{spawn_reconnect_worker, ConnectivityState};
    use crate::services::DatabaseService;
    use crate::sync::SyncCoordinator;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const USER: &str = "user-1";

    type Server = Arc<SyncCoordinator<DatabaseService>>;

    /// Talks to an in-process coordinator
    struct LoopbackTransport {
        server: Server,
        reachable: AtomicBool,
        failures: std::sync::Mutex<VecDeque<TransportError>>,
        exchanges: AtomicUsize,
    }

    impl LoopbackTransport {
        fn new(server: &Server) -> Arc<Self> {
            Arc::new(Self {
                server: Arc::clone(server),
                reachable: AtomicBool::new(true),
                failures: std::sync::Mutex::new(VecDeque::new()),
                exchanges: AtomicUsize::new(0),
            })
        }

        fn fail_next(&self, error: TransportError, times: usize) {
            let mut failures = self.failures.lock().unwrap();
            failures.extend(std::iter::repeat(error).take(times));
        }

        fn exchanges(&self) -> usize {
            self.exchanges.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncTransport for LoopbackTransport {
        async fn exchange(&self, request: SyncRequest) -> std::result::Result<SyncResponse, TransportError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(TransportError::Unreachable("connection refused".to_string()));
            }
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.server
                .sync(USER, request)
                .map_err(|error| TransportError::Server {
                    status: 500,
                    message: error.to_string(),
                })
        }

        async fn ping(&self) -> std::result::Result<(), TransportError> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::Unreachable("connection refused".to_string()))
            }
        }
    }

    /// Never answers
    struct StalledTransport;

    #[async_trait]
    impl SyncTransport for StalledTransport {
        async fn exchange(&self, _request: SyncRequest) -> std::result::Result<SyncResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TransportError::Unreachable("unreachable".to_string()))
        }

        async fn ping(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    type Agent = SyncAgent<DatabaseService, Arc<LoopbackTransport>>;

    fn server() -> Server {
        Arc::new(SyncCoordinator::new(
            DatabaseService::open_in_memory().unwrap(),
            &EngineConfig::default(),
        ))
    }

    fn agent_on(
        store: DatabaseService,
        transport: &Arc<LoopbackTransport>,
        device: &str,
        state: ConnectivityState,
        config: EngineConfig,
    ) -> Agent {
        SyncAgent::new(
            store,
            Arc::clone(transport),
            Arc::new(ConnectivityMonitor::new(state)),
            ClientIdentity::new(USER, device),
            config,
        )
        .unwrap()
    }

    fn agent(server: &Server, device: &str, state: ConnectivityState) -> (Agent, Arc<LoopbackTransport>) {
        let transport = LoopbackTransport::new(server);
        let agent = agent_on(
            DatabaseService::open_in_memory().unwrap(),
            &transport,
            device,
            state,
            EngineConfig::default(),
        );
        (agent, transport)
    }

    fn task(title: &str) -> TaskPayload {
        TaskPayload::new(title)
    }

    fn title_of(entity: &Entity) -> String {
        match &entity.payload {
            EntityPayload::Task(task) => task.title.clone(),
            EntityPayload::Session(_) => panic!("expected a task"),
        }
    }

    #[tokio::test]
    async fn offline_edits_replay_in_order() {
        let server = server();
        let (agent, _) = agent(&server, "laptop", ConnectivityState::Offline);

        let created = agent.create_task(task("Write report")).await.unwrap();
        let mut renamed = task("Write final report");
        renamed.status = TaskStatus::InProgress;
        agent
            .update(&created.id, EntityPayload::Task(renamed))
            .await
            .unwrap();
        agent.delete(&created.id).await.unwrap();

        assert_eq!(agent.queue().pending_count().unwrap(), 3);
        assert!(server.store().get(&created.id).unwrap().is_none());

        agent.monitor().observe(true);
        let report = agent.replay().await.unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 0);
        assert!(!report.interrupted);

        let stored = server.store().get(&created.id).unwrap().unwrap();
        assert!(stored.deleted);
        assert!(server.store().tombstone(&created.id).unwrap().is_some());
        assert_eq!(agent.queue().pending_count().unwrap(), 0);
        assert!(agent.get(&created.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn online_create_reaches_server_immediately() {
        let server = server();
        let (agent, transport) = agent(&server, "laptop", ConnectivityState::Online);

        let created = agent.create_task(task("Plan sprint")).await.unwrap();
        assert_eq!(transport.exchanges(), 1);

        let stored = server.store().get(&created.id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(title_of(&stored), "Plan sprint");
        assert!(agent.last_sync_time().unwrap().is_some());
    }

    #[tokio::test]
    async fn transient_failures_stop_at_the_retry_ceiling() {
        let server = server();
        let (agent, transport) = agent(&server, "laptop", ConnectivityState::Online);
        transport.fail_next(
            TransportError::Server {
                status: 503,
                message: "maintenance".to_string(),
            },
            10,
        );

        let created = agent.create_task(task("Unlucky")).await.unwrap();
        assert_eq!(transport.exchanges(), 3);

        let operations = agent.queue().list(Some(OperationStatus::Failed)).unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].retry_count, 3);
        assert!(operations[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("maintenance"));

        // Failed operations are not retried by later passes
        let report = agent.replay().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(transport.exchanges(), 3);
        assert!(server.store().get(&created.id).unwrap().is_none());
        // The local copy survives
        assert!(agent.get(&created.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn rejected_operations_fail_without_retry() {
        let server = server();
        let (laptop, _) = agent(&server, "laptop", ConnectivityState::Online);
        let (phone, _) = agent(&server, "phone", ConnectivityState::Online);

        let created = laptop.create_task(task("Shared")).await.unwrap();
        phone.sync_now().await.unwrap();
        assert!(phone.get(&created.id).unwrap().is_some());

        // Laptop goes offline and edits; phone deletes meanwhile
        laptop.monitor().observe(false);
        laptop
            .update(&created.id, EntityPayload::Task(task("Shared, edited")))
            .await
            .unwrap();
        phone.delete(&created.id).await.unwrap();

        laptop.monitor().observe(true);
        let report = laptop.replay().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 0);

        let failed = laptop.queue().list(Some(OperationStatus::Failed)).unwrap();
        assert_eq!(failed[0].retry_count, 0);

        // The next pull starts over and drops the deleted entity
        assert!(laptop.store().resync_pending().unwrap());
        let pulled = laptop.sync_now().await.unwrap();
        assert_eq!(pulled.removed, 1);
        assert!(laptop.get(&created.id).unwrap().is_none());
        assert!(!laptop.store().resync_pending().unwrap());
    }

    #[tokio::test]
    async fn terminal_failure_does_not_turn_later_edits_into_conflicts() {
        let server = server();
        let (laptop, _) = agent(&server, "laptop", ConnectivityState::Online);
        let (phone, _) = agent(&server, "phone", ConnectivityState::Online);

        let doomed = phone.create_task(task("Doomed")).await.unwrap();
        let untouched = phone.create_task(task("Untouched")).await.unwrap();
        laptop.sync_now().await.unwrap();
        let cursor = laptop.last_sync_time().unwrap().unwrap();

        laptop.monitor().observe(false);
        laptop
            .update(&doomed.id, EntityPayload::Task(task("Doomed, edited")))
            .await
            .unwrap();
        laptop
            .update(&untouched.id, EntityPayload::Task(task("Untouched, edited")))
            .await
            .unwrap();
        phone.delete(&doomed.id).await.unwrap();

        laptop.monitor().observe(true);
        let report = laptop.replay().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);

        // The second edit went out against the real cursor and was accepted as is
        assert_eq!(server.stats(USER).unwrap().conflicts_total, 0);
        let stored = server.store().get(&untouched.id).unwrap().unwrap();
        assert_eq!(title_of(&stored), "Untouched, edited");
        assert_eq!(stored.last_modified_device, "laptop");
        assert!(laptop.last_sync_time().unwrap().unwrap() >= cursor);
        assert!(laptop.store().resync_pending().unwrap());
    }

    #[tokio::test]
    async fn unreachable_server_interrupts_replay() {
        let server = server();
        let (agent, transport) = agent(&server, "laptop", ConnectivityState::Offline);
        agent.create_task(task("One")).await.unwrap();
        agent.create_task(task("Two")).await.unwrap();

        agent.monitor().observe(true);
        transport.reachable.store(false, Ordering::SeqCst);
        let report = agent.replay().await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.retried, 1);
        assert!(!agent.monitor().is_online());
        assert_eq!(agent.queue().pending_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn unauthorized_halts_without_charging_the_operation() {
        let server = server();
        let (agent, transport) = agent(&server, "laptop", ConnectivityState::Online);
        transport.fail_next(
            TransportError::Rejected {
                status: 401,
                message: "token expired".to_string(),
            },
            1,
        );

        let created = agent.create_task(task("Later")).await.unwrap();
        let pending = agent.queue().list(Some(OperationStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);

        let report = agent.replay().await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(server.store().get(&created.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn interrupted_operations_are_recovered_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        let server = server();
        let transport = LoopbackTransport::new(&server);

        let created = {
            let agent = agent_on(
                DatabaseService::open_path(&path).unwrap(),
                &transport,
                "laptop",
                ConnectivityState::Offline,
                EngineConfig::default(),
            );
            let created = agent.create_task(task("Survive a crash")).await.unwrap();
            // Claimed but never finished
            agent.queue().dequeue_next().unwrap().unwrap();
            created
        };

        let agent = agent_on(
            DatabaseService::open_path(&path).unwrap(),
            &transport,
            "laptop",
            ConnectivityState::Online,
            EngineConfig::default(),
        );
        assert_eq!(agent.queue().pending_count().unwrap(), 1);

        let report = agent.replay().await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(server.store().get(&created.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn pull_applies_remote_changes_but_keeps_queued_edits() {
        let server = server();
        let (laptop, _) = agent(&server, "laptop", ConnectivityState::Online);
        let (phone, _) = agent(&server, "phone", ConnectivityState::Online);

        let kept = phone.create_task(task("Kept")).await.unwrap();
        let dropped = phone.create_task(task("Dropped")).await.unwrap();
        let pulled = laptop.sync_now().await.unwrap();
        assert_eq!(pulled.received, 2);

        laptop.monitor().observe(false);
        laptop
            .update(&kept.id, EntityPayload::Task(task("Kept, laptop edit")))
            .await
            .unwrap();

        phone
            .update(&kept.id, EntityPayload::Task(task("Kept, phone edit")))
            .await
            .unwrap();
        phone.delete(&dropped.id).await.unwrap();

        let before = laptop.last_sync_time().unwrap();
        let pulled = laptop.sync_now().await.unwrap();
        assert_eq!(pulled.removed, 1);
        assert_eq!(pulled.skipped, 1);
        assert!(laptop.get(&dropped.id).unwrap().is_none());
        assert_eq!(
            title_of(&laptop.get(&kept.id).unwrap().unwrap()),
            "Kept, laptop edit"
        );
        // Held-back changes are fetched again next time
        assert_eq!(laptop.last_sync_time().unwrap(), before);
    }

    #[tokio::test]
    async fn reconnect_replays_then_pulls() {
        let server = server();
        let (phone, _) = agent(&server, "phone", ConnectivityState::Online);
        let remote = phone.create_task(task("From phone")).await.unwrap();

        let (laptop, _) = agent(&server, "laptop", ConnectivityState::Offline);
        let local = laptop.create_task(task("From laptop")).await.unwrap();

        let laptop = Arc::new(laptop);
        let worker = spawn_reconnect_worker(laptop.monitor(), Arc::clone(&laptop));
        laptop.monitor().observe(true);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let drained = laptop.queue().pending_count().unwrap() == 0;
                let pulled = laptop.get(&remote.id).unwrap().is_some();
                if drained && pulled {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(server.store().get(&local.id).unwrap().is_some());
        worker.abort();
    }

    #[tokio::test]
    async fn update_of_missing_entity_is_not_found() {
        let server = server();
        let (agent, _) = agent(&server, "laptop", ConnectivityState::Offline);
        let error = agent
            .update(&EntityId::new(), EntityPayload::Task(task("Ghost")))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
        assert_eq!(agent.queue().pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_payloads_are_not_queued() {
        let server = server();
        let (agent, _) = agent(&server, "laptop", ConnectivityState::Offline);
        let error = agent.create_task(task("   ")).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(agent.queue().pending_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_exchange_times_out() {
        let config = EngineConfig {
            request_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let agent = SyncAgent::new(
            DatabaseService::open_in_memory().unwrap(),
            StalledTransport,
            Arc::new(ConnectivityMonitor::new(ConnectivityState::Online)),
            ClientIdentity::new(USER, "laptop"),
            config,
        )
        .unwrap();

        let error = agent.sync_now().await.unwrap_err();
        assert!(matches!(
            error,
            Error::Transport(TransportError::Timeout(_))
        ));
        assert!(error.is_transient());
        assert!(!agent.monitor().is_online());
    }
}
