use focus_core::models::{Entity, EntityKind, EntityPayload, TaskPayload, TaskPriority, TaskStatus};
use focus_core::util::normalize_text_option;
use serde::Serialize;

use crate::cli::{PriorityArg, StatusArg};
use crate::commands::common::{
    format_relative_time, now_ms, report_delivery, resolve_entity, short_id, task_payload, Agent,
};
use crate::error::CliError;

#[derive(Debug, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<PriorityArg>,
    pub status: Option<StatusArg>,
}

impl TaskChanges {
    const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: &'static str,
    pub status: &'static str,
    pub tags: Vec<String>,
    pub version: i64,
    pub updated_at: i64,
}

pub async fn run_add(
    agent: &Agent,
    title_parts: &[String],
    description: Option<String>,
    priority: Option<PriorityArg>,
    tags: Vec<String>,
) -> Result<(), CliError> {
    let entity = add_task(agent, title_parts, description, priority, tags).await?;
    println!("{}", entity.id);
    report_delivery(agent, &entity.id)
}

pub async fn add_task(
    agent: &Agent,
    title_parts: &[String],
    description: Option<String>,
    priority: Option<PriorityArg>,
    tags: Vec<String>,
) -> Result<Entity, CliError> {
    let title = title_parts.join(" ").trim().to_string();
    if title.is_empty() {
        return Err(CliError::EmptyTitle);
    }

    let mut task = TaskPayload::new(title);
    task.description = normalize_text_option(description);
    if let Some(priority) = priority {
        task.priority = priority.into();
    }
    task.tags = tags
        .into_iter()
        .filter_map(|tag| normalize_text_option(Some(tag)))
        .collect();

    Ok(agent.create_task(task).await?)
}

pub async fn run_update(agent: &Agent, query: &str, changes: TaskChanges) -> Result<(), CliError> {
    let entity = update_task(agent, query, changes).await?;
    println!("{}", entity.id);
    report_delivery(agent, &entity.id)
}

pub async fn update_task(
    agent: &Agent,
    query: &str,
    changes: TaskChanges,
) -> Result<Entity, CliError> {
    if changes.is_empty() {
        return Err(CliError::NothingToUpdate);
    }

    let entity = resolve_entity(agent, EntityKind::Task, query)?;
    let Some(current) = task_payload(&entity) else {
        return Err(CliError::NotFound(EntityKind::Task.as_str(), query.to_string()));
    };
    let mut task = current.clone();

    if let Some(title) = changes.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(CliError::EmptyTitle);
        }
        task.title = title;
    }
    if changes.description.is_some() {
        task.description = normalize_text_option(changes.description);
    }
    if let Some(priority) = changes.priority {
        task.priority = priority.into();
    }
    if let Some(status) = changes.status {
        task.status = status.into();
    }

    Ok(agent.update(&entity.id, EntityPayload::Task(task)).await?)
}

pub async fn run_done(agent: &Agent, query: &str) -> Result<(), CliError> {
    let changes = TaskChanges {
        status: Some(StatusArg::Completed),
        ..TaskChanges::default()
    };
    run_update(agent, query, changes).await
}

pub async fn run_delete(agent: &Agent, query: &str) -> Result<(), CliError> {
    let id = delete_task(agent, query).await?;
    println!("Deleted task {}", short_id(&id));
    report_delivery(agent, &id)
}

pub async fn delete_task(
    agent: &Agent,
    query: &str,
) -> Result<focus_core::EntityId, CliError> {
    let entity = resolve_entity(agent, EntityKind::Task, query)?;
    agent.delete(&entity.id).await?;
    Ok(entity.id)
}

pub fn run_list(agent: &Agent, status: Option<StatusArg>, as_json: bool) -> Result<(), CliError> {
    let tasks = list_tasks(agent, status)?;

    if as_json {
        let items = tasks.iter().filter_map(task_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    for line in format_task_lines(&tasks, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub fn list_tasks(agent: &Agent, status: Option<StatusArg>) -> Result<Vec<Entity>, CliError> {
    let wanted = status.map(TaskStatus::from);
    Ok(agent
        .list(Some(EntityKind::Task))?
        .into_iter()
        .filter(|entity| {
            task_payload(entity).is_some_and(|task| wanted.is_none_or(|status| task.status == status))
        })
        .collect())
}

pub fn task_to_item(entity: &Entity) -> Option<TaskListItem> {
    let task = task_payload(entity)?;
    Some(TaskListItem {
        id: entity.id.to_string(),
        title: task.title.clone(),
        description: task.description.clone(),
        priority: priority_label(task.priority),
        status: status_label(task.status),
        tags: task.tags.clone(),
        version: entity.version,
        updated_at: entity.updated_at,
    })
}

pub fn format_task_lines(tasks: &[Entity], now: i64) -> Vec<String> {
    tasks
        .iter()
        .filter_map(|entity| {
            let task = task_payload(entity)?;
            let mut line = format!(
                "{}  [{}] {:<6}  {}  ({})",
                short_id(&entity.id),
                status_mark(task.status),
                priority_label(task.priority),
                task.title,
                format_relative_time(entity.updated_at, now),
            );
            if !task.tags.is_empty() {
                line.push_str("  #");
                line.push_str(&task.tags.join(" #"));
            }
            Some(line)
        })
        .collect()
}

pub const fn priority_label(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Medium => "medium",
        TaskPriority::High => "high",
    }
}

pub const fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
    }
}

const fn status_mark(status: TaskStatus) -> char {
    match status {
        TaskStatus::Pending => ' ',
        TaskStatus::InProgress => '~',
        TaskStatus::Completed => 'x',
    }
}
