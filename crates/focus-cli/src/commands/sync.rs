use focus_core::models::Conflict;
use focus_core::offline::{ConnectivityState, HttpSyncTransport, ReplayReport, SyncReport};
use focus_core::EngineConfig;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, short_id, Agent, ClientSettings};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub user_id: String,
    pub device_id: String,
    pub server: Option<String>,
    pub connectivity: &'static str,
    pub pending_operations: usize,
    pub failed_operations: usize,
    pub last_sync_time: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub entity_id: String,
    pub kind: String,
    pub resolution: &'static str,
    pub winner: &'static str,
    pub resolved_at: i64,
}

pub async fn run_sync(agent: &Agent, settings: &ClientSettings) -> Result<(), CliError> {
    let (replay, pulled) = sync(agent, settings).await?;

    println!("{}", format_replay_summary(&replay));
    match pulled {
        Some(report) => println!("{}", format_pull_summary(&report)),
        None => println!("Pull skipped; replay was interrupted"),
    }
    Ok(())
}

/// Replay the queue and pull, failing fast when no server is usable
pub async fn sync(
    agent: &Agent,
    settings: &ClientSettings,
) -> Result<(ReplayReport, Option<SyncReport>), CliError> {
    let Some(url) = settings.api_url.as_deref() else {
        return Err(CliError::SyncNotConfigured);
    };
    if settings.offline || !agent.monitor().is_online() {
        return Err(CliError::ServerUnreachable(url.to_string()));
    }

    Ok(agent.resume().await?)
}

pub fn run_status(agent: &Agent, settings: &ClientSettings, as_json: bool) -> Result<(), CliError> {
    let report = status_report(agent, settings)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("User:        {}", report.user_id);
    println!("Device:      {}", report.device_id);
    println!(
        "Server:      {}",
        report.server.as_deref().unwrap_or("(not configured)")
    );
    println!("Connection:  {}", report.connectivity);
    println!("Pending:     {}", report.pending_operations);
    println!("Failed:      {}", report.failed_operations);
    println!(
        "Last sync:   {}",
        report
            .last_sync_time
            .filter(|time| *time > 0)
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    Ok(())
}

pub fn status_report(agent: &Agent, settings: &ClientSettings) -> Result<StatusReport, CliError> {
    let connectivity = if settings.api_url.is_none() {
        "not configured"
    } else {
        match agent.monitor().state() {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        }
    };

    Ok(StatusReport {
        user_id: agent.identity().user_id.clone(),
        device_id: agent.identity().device_id.clone(),
        server: settings.api_url.clone(),
        connectivity,
        pending_operations: agent.queue().pending_count()?,
        failed_operations: agent.queue().failed_count()?,
        last_sync_time: agent.last_sync_time()?,
    })
}

pub async fn run_conflicts(
    settings: &ClientSettings,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let Some(url) = settings.api_url.as_deref() else {
        return Err(CliError::SyncNotConfigured);
    };
    let config = EngineConfig::from_env().map_err(|error| CliError::Config(error.to_string()))?;
    let transport = HttpSyncTransport::new(url, settings.token.clone(), config.request_timeout)?;
    let conflicts = transport.recent_conflicts(limit).await?;

    if as_json {
        let items = conflicts.iter().map(conflict_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        id: conflict.id.to_string(),
        entity_id: conflict.entity_id.to_string(),
        kind: conflict.entity_kind.to_string(),
        resolution: conflict.resolution.as_str(),
        winner: conflict.winner.as_str(),
        resolved_at: conflict.resolved_at,
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<7}  {}  {} ({} wins)",
                format_sync_timestamp(conflict.resolved_at),
                conflict.entity_kind.as_str(),
                short_id(&conflict.entity_id),
                conflict.resolution.as_str(),
                conflict.winner.as_str(),
            )
        })
        .collect()
}

pub fn format_replay_summary(report: &ReplayReport) -> String {
    if report.is_empty() {
        return "Nothing to replay".to_string();
    }
    let mut summary = format!(
        "Replayed {} operation(s); {} failed, {} will retry",
        report.completed, report.failed, report.retried
    );
    if report.interrupted {
        summary.push_str(" (interrupted)");
    }
    summary
}

pub fn format_pull_summary(report: &SyncReport) -> String {
    format!(
        "Pulled {} change(s) and {} deletion(s); {} conflict(s) resolved, {} kept for pending edits",
        report.received, report.removed, report.conflicts, report.skipped
    )
}
