use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNASSIGNED_PROJECT: &str = "unassigned";

/// Named cadences offered by the task form. Every pattern collapses into a
/// plain day interval; nothing downstream branches on the pattern itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Custom(i32),
}

impl RecurrencePattern {
    pub fn interval_days(self) -> i32 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Biweekly => 14,
            Self::Monthly => 30,
            Self::Custom(days) => days,
        }
    }

    /// Parses the pattern names stored on task documents. `custom_days` is only
    /// consulted for `"custom"`.
    pub fn parse(name: &str, custom_days: Option<i32>) -> Result<Self, String> {
        match name.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "custom" => custom_days
                .map(Self::Custom)
                .ok_or_else(|| "custom recurrence requires an interval".to_string()),
            other => Err(format!("unsupported recurrence pattern: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub is_recurring: bool,
    pub recurring_interval_days: i32,
    pub recurring_end_date: Option<DateTime<Utc>>,
    pub total_time_logged: f64,
}

impl Task {
    pub fn one_off(
        id: impl Into<String>,
        title: impl Into<String>,
        start_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: None,
            title: title.into(),
            start_date,
            due_date,
            is_recurring: false,
            recurring_interval_days: 1,
            recurring_end_date: None,
            total_time_logged: 0.0,
        }
    }

    pub fn recurring(
        id: impl Into<String>,
        title: impl Into<String>,
        start_date: DateTime<Utc>,
        pattern: RecurrencePattern,
    ) -> Self {
        Self::one_off(id, title, start_date, start_date).with_recurrence(pattern)
    }

    pub fn with_recurrence(mut self, pattern: RecurrencePattern) -> Self {
        self.is_recurring = true;
        self.recurring_interval_days = pattern.interval_days();
        self
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.recurring_end_date = Some(end_date);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_total_time_logged(mut self, seconds: f64) -> Self {
        self.total_time_logged = seconds;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        if self.is_recurring {
            if self.recurring_interval_days < 1 {
                return Err("task.recurring_interval_days must be >= 1".to_string());
            }
            if let Some(end_date) = self.recurring_end_date {
                if end_date < self.start_date {
                    return Err(
                        "task.recurring_end_date must not precede task.start_date".to_string(),
                    );
                }
            }
        }
        if !self.total_time_logged.is_finite() || self.total_time_logged < 0.0 {
            return Err("task.total_time_logged must be a non-negative number".to_string());
        }
        Ok(())
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::for_task(self)
    }

    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            task_id: self.id.clone(),
            project_id: self.project_id.clone(),
        }
    }
}

/// Local persistence key for a task's timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn for_task(task: &Task) -> Self {
        let project = task
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(UNASSIGNED_PROJECT);
        Self(format!("{project}_{}", task.title.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the remote store needs to address a task document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    pub task_id: String,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub is_running: bool,
    pub session_start: Option<DateTime<Utc>>,
    pub accumulated_seconds: f64,
    pub last_session_seconds: f64,
}

impl TimerState {
    pub fn idle(accumulated_seconds: f64) -> Self {
        Self {
            is_running: false,
            session_start: None,
            accumulated_seconds,
            last_session_seconds: 0.0,
        }
    }

    /// `session_start` must be present exactly when running, and the totals
    /// must be usable numbers.
    pub fn is_consistent(&self) -> bool {
        self.is_running == self.session_start.is_some()
            && self.accumulated_seconds.is_finite()
            && self.accumulated_seconds >= 0.0
            && self.last_session_seconds.is_finite()
            && self.last_session_seconds >= 0.0
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
