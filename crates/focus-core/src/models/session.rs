//! Pomodoro session payload

use serde::{Deserialize, Serialize};

use super::entity::EntityId;

const MAX_PLANNED_DURATION_SECS: u32 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// Domain fields of a pomodoro session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(default)]
    pub task_id: Option<EntityId>,
    #[serde(default)]
    pub session_type: SessionType,
    #[serde(default)]
    pub status: SessionStatus,
    pub planned_duration_secs: u32,
    #[serde(default)]
    pub actual_duration_secs: Option<u32>,
    /// Start timestamp (Unix ms)
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub interruption_count: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SessionPayload {
    /// Start a new active session now
    #[must_use]
    pub fn start(task_id: Option<EntityId>, session_type: SessionType, planned_duration_secs: u32) -> Self {
        Self {
            task_id,
            session_type,
            status: SessionStatus::Active,
            planned_duration_secs,
            actual_duration_secs: None,
            started_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
            interruption_count: 0,
            notes: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.planned_duration_secs == 0 || self.planned_duration_secs > MAX_PLANNED_DURATION_SECS {
            return Err(format!(
                "planned duration must be in (0, {MAX_PLANNED_DURATION_SECS}] seconds"
            ));
        }
        if let Some(completed_at) = self.completed_at {
            if completed_at < self.started_at {
                return Err("session completed before it started".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_is_active() {
        let session = SessionPayload::start(None, SessionType::Work, 1500);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_session_rejects_zero_duration() {
        let session = SessionPayload::start(None, SessionType::ShortBreak, 0);
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_session_rejects_completion_before_start() {
        let mut session = SessionPayload::start(None, SessionType::Work, 1500);
        session.completed_at = Some(session.started_at - 1);
        assert!(session.validate().is_err());
    }
}
