use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use focus_core::db::{LocalStateRepository, OperationRepository, DEVICE_ID_KEY};
use focus_core::models::{
    DeviceInfo, Entity, EntityId, EntityKind, EntityPayload, OfflineOperation, SyncRequest,
    SyncResponse,
};
use focus_core::offline::{
    ClientIdentity, ConnectivityMonitor, ConnectivityState, HttpSyncTransport, SyncAgent,
    SyncTransport, TransportError,
};
use focus_core::util::normalize_text_option;
use focus_core::{DatabaseService, EngineConfig};
use serde::Serialize;

use crate::cli::Cli;
use crate::error::CliError;

pub type Agent = SyncAgent<DatabaseService, ClientTransport>;

/// Where the CLI keeps its data and which server it talks to
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub db_path: PathBuf,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub user_id: String,
    pub device_id: Option<String>,
    pub offline: bool,
}

impl ClientSettings {
    pub fn resolve(cli: &Cli) -> Result<Self, CliError> {
        let db_path = resolve_db_path(cli.db_path.clone())?;
        Ok(Self {
            db_path,
            api_url: normalize_text_option(cli.api_url.clone().or_else(|| env_value("FOCUS_API_URL"))),
            token: normalize_text_option(cli.token.clone().or_else(|| env_value("FOCUS_TOKEN"))),
            user_id: normalize_text_option(cli.user_id.clone().or_else(|| env_value("FOCUS_USER_ID")))
                .unwrap_or_else(|| "local".to_string()),
            device_id: normalize_text_option(
                cli.device_id.clone().or_else(|| env_value("FOCUS_DEVICE_ID")),
            ),
            offline: cli.offline,
        })
    }

    /// Settings for a local-only database, used by tests
    #[cfg(test)]
    pub fn local(db_path: PathBuf) -> Self {
        Self {
            db_path,
            api_url: None,
            token: None,
            user_id: "local".to_string(),
            device_id: Some("test-device".to_string()),
            offline: true,
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok()
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("FOCUS_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("focus").join("focus.db"))
        .ok_or_else(|| CliError::Config("failed to resolve the data directory".to_string()))
}

/// The configured server, or none
pub enum ClientTransport {
    Http(HttpSyncTransport),
    Unconfigured,
}

impl ClientTransport {
    pub const fn is_configured(&self) -> bool {
        matches!(self, Self::Http(_))
    }

    fn unconfigured() -> TransportError {
        TransportError::InvalidConfiguration("no sync server configured".to_string())
    }
}

#[async_trait]
impl SyncTransport for ClientTransport {
    async fn exchange(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        match self {
            Self::Http(transport) => transport.exchange(request).await,
            Self::Unconfigured => Err(Self::unconfigured()),
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        match self {
            Self::Http(transport) => transport.ping().await,
            Self::Unconfigured => Err(Self::unconfigured()),
        }
    }
}

/// Open the local store and wire up a sync agent, probing the server once
pub async fn open_agent(settings: &ClientSettings) -> Result<Agent, CliError> {
    let config = EngineConfig::from_env().map_err(|error| CliError::Config(error.to_string()))?;
    let store = DatabaseService::open_path(settings.db_path.clone())?;

    let transport = match &settings.api_url {
        Some(url) => ClientTransport::Http(HttpSyncTransport::new(
            url,
            settings.token.clone(),
            config.request_timeout,
        )?),
        None => ClientTransport::Unconfigured,
    };

    let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityState::Offline));
    if transport.is_configured() && !settings.offline {
        monitor.probe(&transport).await;
    }

    let device_id = resolve_device_id(settings, &store)?;
    let identity = ClientIdentity::new(&settings.user_id, device_id).with_device_info(device_info());

    Ok(SyncAgent::new(store, transport, monitor, identity, config)?)
}

/// Explicit id, else the stored one, else a fresh id that is stored for next time
fn resolve_device_id(settings: &ClientSettings, store: &DatabaseService) -> Result<String, CliError> {
    if let Some(device_id) = &settings.device_id {
        return Ok(device_id.clone());
    }
    if let Some(device_id) = store.get_value(DEVICE_ID_KEY)? {
        return Ok(device_id);
    }

    let device_id = format!("cli-{}", uuid::Uuid::now_v7());
    store.set_value(DEVICE_ID_KEY, &device_id)?;
    tracing::debug!(device = %device_id, "Registered new CLI device id");
    Ok(device_id)
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        name: env::var("HOSTNAME").unwrap_or_else(|_| "focus-cli".to_string()),
        device_type: "cli".to_string(),
        platform: env::consts::OS.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a live entity by full id or unique id prefix
pub fn resolve_entity(agent: &Agent, kind: EntityKind, query: &str) -> Result<Entity, CliError> {
    let query = normalize_identifier(query)?;

    if let Ok(id) = query.parse::<EntityId>() {
        if let Some(entity) = agent.get(&id)? {
            if entity.kind() == kind {
                return Ok(entity);
            }
        }
    }

    let mut matches = agent
        .list(Some(kind))?
        .into_iter()
        .filter(|entity| entity.id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::NotFound(kind.as_str(), query)),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|entity| short_id(&entity.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Tell the user whether a local edit reached the server
pub fn report_delivery(agent: &Agent, entity_id: &EntityId) -> Result<(), CliError> {
    if agent.store().has_unfinished_for(entity_id)? {
        eprintln!("Saved locally; queued for sync");
    }
    Ok(())
}

pub fn short_id(id: &EntityId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Serialize)]
pub struct OperationItem {
    pub id: String,
    pub method: String,
    pub kind: String,
    pub entity_id: String,
    pub status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
}

pub fn operation_to_item(operation: &OfflineOperation) -> OperationItem {
    OperationItem {
        id: operation.id.to_string(),
        method: operation.method.to_string(),
        kind: operation.target.kind.to_string(),
        entity_id: operation.target.entity_id.to_string(),
        status: operation.status.to_string(),
        retry_count: operation.retry_count,
        last_error: operation.last_error.clone(),
        created_at: operation.created_at,
    }
}

pub fn format_operation_lines(operations: &[OfflineOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let line = format!(
                "{}  {:<10}  {:<6}  {:<7}  {}",
                format_sync_timestamp(operation.created_at),
                operation.status.as_str(),
                operation.method.as_str(),
                operation.target.kind.as_str(),
                short_id(&operation.target.entity_id),
            );
            match &operation.last_error {
                Some(error) => format!("{line}  retries={}  {error}", operation.retry_count),
                None => line,
            }
        })
        .collect()
}

pub fn task_payload(entity: &Entity) -> Option<&focus_core::models::TaskPayload> {
    match &entity.payload {
        EntityPayload::Task(task) => Some(task),
        EntityPayload::Session(_) => None,
    }
}

pub fn session_payload(entity: &Entity) -> Option<&focus_core::models::SessionPayload> {
    match &entity.payload {
        EntityPayload::Session(session) => Some(session),
        EntityPayload::Task(_) => None,
    }
}
