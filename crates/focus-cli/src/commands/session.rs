use focus_core::models::{
    Entity, EntityKind, EntityPayload, SessionPayload, SessionStatus, SessionType,
};
use serde::Serialize;

use crate::cli::SessionKindArg;
use crate::commands::common::{
    format_sync_timestamp, now_ms, report_delivery, resolve_entity, session_payload, short_id,
    Agent,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SessionListItem {
    pub id: String,
    pub task_id: Option<String>,
    pub session_type: &'static str,
    pub status: &'static str,
    pub planned_duration_secs: u32,
    pub actual_duration_secs: Option<u32>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

pub async fn run_start(
    agent: &Agent,
    task: Option<&str>,
    kind: SessionKindArg,
    minutes: u32,
) -> Result<(), CliError> {
    let entity = start_session(agent, task, kind, minutes).await?;
    println!("{}", entity.id);
    report_delivery(agent, &entity.id)
}

pub async fn start_session(
    agent: &Agent,
    task: Option<&str>,
    kind: SessionKindArg,
    minutes: u32,
) -> Result<Entity, CliError> {
    let task_id = match task {
        Some(query) => Some(resolve_entity(agent, EntityKind::Task, query)?.id),
        None => None,
    };

    let session = SessionPayload::start(task_id, kind.into(), minutes.saturating_mul(60));
    Ok(agent.create_session(session).await?)
}

pub async fn run_finish(agent: &Agent, query: &str) -> Result<(), CliError> {
    let entity = finish_session(agent, query, now_ms()).await?;
    println!("{}", entity.id);
    report_delivery(agent, &entity.id)
}

/// Complete a session, recording how long it actually ran
pub async fn finish_session(agent: &Agent, query: &str, now: i64) -> Result<Entity, CliError> {
    let entity = resolve_entity(agent, EntityKind::Session, query)?;
    let Some(current) = session_payload(&entity) else {
        return Err(CliError::NotFound(EntityKind::Session.as_str(), query.to_string()));
    };

    let mut session = current.clone();
    let elapsed_secs = now.saturating_sub(session.started_at).max(0) / 1_000;
    session.status = SessionStatus::Completed;
    session.completed_at = Some(now);
    session.actual_duration_secs = Some(u32::try_from(elapsed_secs).unwrap_or(u32::MAX));

    Ok(agent.update(&entity.id, EntityPayload::Session(session)).await?)
}

pub fn run_list(agent: &Agent, as_json: bool) -> Result<(), CliError> {
    let sessions = agent.list(Some(EntityKind::Session))?;

    if as_json {
        let items = sessions.iter().filter_map(session_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    for line in format_session_lines(&sessions) {
        println!("{line}");
    }
    Ok(())
}

pub fn session_to_item(entity: &Entity) -> Option<SessionListItem> {
    let session = session_payload(entity)?;
    Some(SessionListItem {
        id: entity.id.to_string(),
        task_id: session.task_id.map(|id| id.to_string()),
        session_type: session_type_label(session.session_type),
        status: session_status_label(session.status),
        planned_duration_secs: session.planned_duration_secs,
        actual_duration_secs: session.actual_duration_secs,
        started_at: session.started_at,
        completed_at: session.completed_at,
    })
}

pub fn format_session_lines(sessions: &[Entity]) -> Vec<String> {
    sessions
        .iter()
        .filter_map(|entity| {
            let session = session_payload(entity)?;
            let minutes = session
                .actual_duration_secs
                .unwrap_or(session.planned_duration_secs)
                / 60;
            Some(format!(
                "{}  {}  {:<11}  {:<9}  {minutes}m",
                short_id(&entity.id),
                format_sync_timestamp(session.started_at),
                session_type_label(session.session_type),
                session_status_label(session.status),
            ))
        })
        .collect()
}

pub const fn session_type_label(session_type: SessionType) -> &'static str {
    match session_type {
        SessionType::Work => "work",
        SessionType::ShortBreak => "short_break",
        SessionType::LongBreak => "long_break",
    }
}

pub const fn session_status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Paused => "paused",
        SessionStatus::Completed => "completed",
        SessionStatus::Cancelled => "cancelled",
    }
}
