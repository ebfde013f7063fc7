use std::path::Path;

use focus_core::models::{
    EntityKind, OperationMethod, OperationStatus, SessionStatus, TaskPriority, TaskStatus,
};
use focus_core::offline::ReplayReport;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::cli::{PriorityArg, SessionKindArg, StatusArg};
use crate::commands::common::{
    format_relative_time, format_sync_timestamp, open_agent, resolve_entity, session_payload,
    task_payload, Agent, ClientSettings,
};
use crate::commands::session::{finish_session, start_session};
use crate::commands::sync::{format_replay_summary, status_report, sync};
use crate::commands::task::{
    add_task, delete_task, format_task_lines, list_tasks, update_task, TaskChanges,
};
use crate::error::CliError;

async fn local_agent(dir: &Path) -> (Agent, ClientSettings) {
    let settings = ClientSettings::local(dir.join("focus.db"));
    let agent = open_agent(&settings).await.unwrap();
    (agent, settings)
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

fn common_prefix(left: &str, right: &str) -> String {
    left.chars()
        .zip(right.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn added_tasks_are_listed_and_queued() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;

    let first = add_task(
        &agent,
        &words("Write report"),
        Some("  quarterly  ".to_string()),
        Some(PriorityArg::High),
        vec!["work".to_string(), "  ".to_string()],
    )
    .await
    .unwrap();
    add_task(&agent, &words("Buy milk"), None, None, Vec::new())
        .await
        .unwrap();

    let tasks = list_tasks(&agent, None).unwrap();
    assert_eq!(tasks.len(), 2);

    let stored = agent.get(&first.id).unwrap().unwrap();
    let task = task_payload(&stored).unwrap();
    assert_eq!(task.title, "Write report");
    assert_eq!(task.description.as_deref(), Some("quarterly"));
    assert_eq!(task.priority, TaskPriority::High);
    assert_eq!(task.tags, vec!["work".to_string()]);

    let queued = agent.queue().list(Some(OperationStatus::Pending)).unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued
        .iter()
        .all(|operation| operation.method == OperationMethod::Create));
}

#[tokio::test(flavor = "current_thread")]
async fn empty_title_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;

    let err = add_task(&agent, &words("   "), None, None, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::EmptyTitle));
    assert_eq!(agent.queue().pending_count().unwrap(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn update_by_prefix_changes_only_given_fields() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;

    let created = add_task(
        &agent,
        &words("Draft"),
        Some("keep me".to_string()),
        None,
        Vec::new(),
    )
    .await
    .unwrap();
    let prefix = created.id.to_string()[..8].to_string();

    let updated = update_task(
        &agent,
        &prefix,
        TaskChanges {
            title: Some("Final draft".to_string()),
            status: Some(StatusArg::InProgress),
            ..TaskChanges::default()
        },
    )
    .await
    .unwrap();

    let task = task_payload(&updated).unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(task.title, "Final draft");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.description.as_deref(), Some("keep me"));
    assert!(updated.version > created.version);
}

#[tokio::test(flavor = "current_thread")]
async fn update_without_fields_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    let created = add_task(&agent, &words("Draft"), None, None, Vec::new())
        .await
        .unwrap();

    let err = update_task(&agent, &created.id.to_string(), TaskChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::NothingToUpdate));
}

#[tokio::test(flavor = "current_thread")]
async fn status_filter_selects_completed_tasks() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;

    let done = add_task(&agent, &words("Done soon"), None, None, Vec::new())
        .await
        .unwrap();
    add_task(&agent, &words("Later"), None, None, Vec::new())
        .await
        .unwrap();
    update_task(
        &agent,
        &done.id.to_string(),
        TaskChanges {
            status: Some(StatusArg::Completed),
            ..TaskChanges::default()
        },
    )
    .await
    .unwrap();

    let completed = list_tasks(&agent, Some(StatusArg::Completed)).unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, done.id);
    assert_eq!(list_tasks(&agent, Some(StatusArg::Pending)).unwrap().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn delete_hides_task_and_queues_delete() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    let created = add_task(&agent, &words("Temporary"), None, None, Vec::new())
        .await
        .unwrap();

    let deleted = delete_task(&agent, &created.id.to_string()).await.unwrap();

    assert_eq!(deleted, created.id);
    assert!(list_tasks(&agent, None).unwrap().is_empty());
    let methods = agent
        .queue()
        .list(None)
        .unwrap()
        .into_iter()
        .map(|operation| operation.method)
        .collect::<Vec<_>>();
    assert_eq!(methods, vec![OperationMethod::Create, OperationMethod::Delete]);
}

#[tokio::test(flavor = "current_thread")]
async fn shared_prefix_is_ambiguous() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    let first = add_task(&agent, &words("One"), None, None, Vec::new())
        .await
        .unwrap();
    let second = add_task(&agent, &words("Two"), None, None, Vec::new())
        .await
        .unwrap();

    let prefix = common_prefix(&first.id.to_string(), &second.id.to_string());
    assert!(!prefix.is_empty());

    let err = resolve_entity(&agent, EntityKind::Task, &prefix).unwrap_err();
    assert!(matches!(err, CliError::AmbiguousId(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_and_empty_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    add_task(&agent, &words("Only"), None, None, Vec::new())
        .await
        .unwrap();

    let missing = resolve_entity(&agent, EntityKind::Task, "zzzz").unwrap_err();
    assert!(matches!(missing, CliError::NotFound("task", _)));

    let empty = resolve_entity(&agent, EntityKind::Task, "  ").unwrap_err();
    assert!(matches!(empty, CliError::EmptyId));
}

#[tokio::test(flavor = "current_thread")]
async fn task_ids_do_not_resolve_as_sessions() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    let task = add_task(&agent, &words("Focus target"), None, None, Vec::new())
        .await
        .unwrap();

    let err = resolve_entity(&agent, EntityKind::Session, &task.id.to_string()).unwrap_err();
    assert!(matches!(err, CliError::NotFound("session", _)));
}

#[tokio::test(flavor = "current_thread")]
async fn session_links_task_and_records_duration_on_finish() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    let task = add_task(&agent, &words("Deep work"), None, None, Vec::new())
        .await
        .unwrap();

    let started = start_session(
        &agent,
        Some(&task.id.to_string()),
        SessionKindArg::Work,
        25,
    )
    .await
    .unwrap();
    let session = session_payload(&started).unwrap();
    assert_eq!(session.task_id, Some(task.id));
    assert_eq!(session.planned_duration_secs, 1_500);
    assert_eq!(session.status, SessionStatus::Active);

    let finished_at = session.started_at + 90_000;
    let finished = finish_session(&agent, &started.id.to_string(), finished_at)
        .await
        .unwrap();
    let session = session_payload(&finished).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.completed_at, Some(finished_at));
    assert_eq!(session.actual_duration_secs, Some(90));
}

#[tokio::test(flavor = "current_thread")]
async fn sync_requires_a_server() {
    let dir = TempDir::new().unwrap();
    let (agent, settings) = local_agent(dir.path()).await;

    let err = sync(&agent, &settings).await.unwrap_err();
    assert!(matches!(err, CliError::SyncNotConfigured));
}

#[tokio::test(flavor = "current_thread")]
async fn sync_in_offline_mode_reports_unreachable_server() {
    let dir = TempDir::new().unwrap();
    let mut settings = ClientSettings::local(dir.path().join("focus.db"));
    settings.api_url = Some("http://127.0.0.1:9".to_string());
    let agent = open_agent(&settings).await.unwrap();
    add_task(&agent, &words("Queued"), None, None, Vec::new())
        .await
        .unwrap();

    let err = sync(&agent, &settings).await.unwrap_err();
    assert!(matches!(err, CliError::ServerUnreachable(url) if url == "http://127.0.0.1:9"));
    assert_eq!(agent.queue().pending_count().unwrap(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn status_reports_queue_and_identity() {
    let dir = TempDir::new().unwrap();
    let (agent, settings) = local_agent(dir.path()).await;
    add_task(&agent, &words("Pending"), None, None, Vec::new())
        .await
        .unwrap();

    let report = status_report(&agent, &settings).unwrap();
    assert_eq!(report.user_id, "local");
    assert_eq!(report.device_id, "test-device");
    assert_eq!(report.connectivity, "not configured");
    assert_eq!(report.pending_operations, 1);
    assert_eq!(report.failed_operations, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn generated_device_id_is_reused() {
    let dir = TempDir::new().unwrap();
    let mut settings = ClientSettings::local(dir.path().join("focus.db"));
    settings.device_id = None;

    let first = open_agent(&settings).await.unwrap().identity().device_id.clone();
    let second = open_agent(&settings).await.unwrap().identity().device_id.clone();

    assert!(first.starts_with("cli-"));
    assert_eq!(first, second);
}

#[tokio::test(flavor = "current_thread")]
async fn task_lines_show_status_and_tags() {
    let dir = TempDir::new().unwrap();
    let (agent, _) = local_agent(dir.path()).await;
    let created = add_task(
        &agent,
        &words("Tagged"),
        None,
        Some(PriorityArg::Low),
        vec!["home".to_string()],
    )
    .await
    .unwrap();

    let lines = format_task_lines(&[created.clone()], created.updated_at + 120_000);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("[ ] low"));
    assert!(lines[0].contains("Tagged"));
    assert!(lines[0].contains("(2m ago)"));
    assert!(lines[0].ends_with("#home"));
}

#[test]
fn relative_time_buckets() {
    let now = 10 * 7 * 24 * 3_600_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 24 * 3_600_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 21 * 24 * 3_600_000, now), "3w ago");
}

#[test]
fn sync_timestamp_formats_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn replay_summary_mentions_interruption() {
    assert_eq!(format_replay_summary(&ReplayReport::default()), "Nothing to replay");

    let report = ReplayReport {
        completed: 2,
        failed: 1,
        retried: 0,
        interrupted: true,
    };
    assert_eq!(
        format_replay_summary(&report),
        "Replayed 2 operation(s); 1 failed, 0 will retry (interrupted)"
    );
}
