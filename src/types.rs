//! Core entity and wire types.

use crate::error::CommandError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task status. Persisted as the lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub const VALUES: &'static str = "pending, in_progress, completed";

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// Task priority. Persisted as the lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub const VALUES: &'static str = "low, medium, high";

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            _ => None,
        }
    }

    /// Lenient parse for generated content: anything outside the enum
    /// becomes Medium.
    pub fn coerce(s: &str) -> Self {
        Self::parse(&s.to_lowercase()).unwrap_or(TaskPriority::Medium)
    }
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A project grouping tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub project_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub created_by: i64,
}

/// A task joined to its project name for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithProject {
    #[serde(flatten)]
    pub task: Task,
    pub project_name: Option<String>,
}

/// A tag, unique per (name, creator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: i64,
    pub name: String,
    pub created_by: i64,
}

/// Typed partial update for a task. Every field is optional; only present
/// fields are applied. Unknown parameter names are rejected during decoding,
/// not here.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub project_id: Option<i64>,
    pub assigned_to: Option<i64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.project_id.is_none()
            && self.assigned_to.is_none()
    }
}

/// A bulk-update task-id selection. `Between` is inclusive of both bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSelection {
    All,
    GreaterThan(i64),
    LessThan(i64),
    Between(i64, i64),
}

/// A task proposed by the generation step, not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTask {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
}

/// The uniform response envelope, independent of transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub response: String,
    pub data: Option<Value>,
}

impl QueryResponse {
    pub fn ok(response: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            response: response.into(),
            data: Some(data),
        }
    }

    pub fn ok_message(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            data: None,
        }
    }

    pub fn failure(response: impl Into<String>) -> Self {
        Self {
            success: false,
            response: response.into(),
            data: None,
        }
    }
}

impl From<CommandError> for QueryResponse {
    fn from(err: CommandError) -> Self {
        Self::failure(err.to_string())
    }
}
