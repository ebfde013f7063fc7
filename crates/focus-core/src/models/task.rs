//! Task payload

use serde::{Deserialize, Serialize};

const MAX_TITLE_LEN: usize = 255;
const MAX_TAGS: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Domain fields of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    /// Due date (Unix ms)
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskPayload {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: TaskPriority::default(),
            status: TaskStatus::default(),
            due_date: None,
            tags: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("task title must not be empty".to_string());
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(format!("task title exceeds {MAX_TITLE_LEN} characters"));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(format!("task has more than {MAX_TAGS} tags"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = TaskPayload::new("Review budget");
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_task_rejects_blank_title() {
        assert!(TaskPayload::new("   ").validate().is_err());
    }

    #[test]
    fn test_task_rejects_long_title() {
        let task = TaskPayload::new("x".repeat(256));
        assert!(task.validate().unwrap_err().contains("255"));
    }

    #[test]
    fn test_task_status_wire_names() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
