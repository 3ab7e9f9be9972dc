//! In-memory task orchestration: epics, tasks, workflows and agent load.
//!
//! Everything lives for the lifetime of the process. Relationships (epic to
//! tasks, task to dependencies) are plain id references; nothing checks them
//! for cycles or dangling ids except [`TaskStore::resolve_dependencies`],
//! which reports what it finds.

mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use store::{
    AssignRequest, BreakdownRequest, DependencyReport, Progress, ProgressRequest, Schedule,
    ScheduleRequest, ScheduledTask, TaskStore, WorkflowRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Blocked,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks are never scheduled again.
    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("unknown task status '{}'", s)))
    }
}

/// Ordered lowest to highest, so `Ord` sorts critical work last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Epic size estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effort {
    S,
    #[default]
    M,
    L,
    XL,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub timestamp: String,
    pub session_id: Option<String>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: TaskPriority,
    /// Minutes.
    pub estimated_duration: Option<u32>,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progress_history: Vec<ProgressEntry>,
    pub created_at: String,
}

impl Task {
    pub fn new(
        title: String,
        description: String,
        task_type: &str,
        priority: TaskPriority,
        estimated_duration: u32,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description,
            task_type: task_type.to_string(),
            priority,
            estimated_duration: Some(estimated_duration),
            status: TaskStatus::Pending,
            dependencies,
            assigned_to: None,
            assigned_at: None,
            progress_history: Vec::new(),
            created_at: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub estimated_effort: Effort,
    pub tasks: Vec<String>,
    pub status: TaskStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub trigger: Value,
    pub steps: Vec<Value>,
    pub created_at: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Available,
    Busy,
}

/// Agent load as seen by the orchestrator. Agents appear the first time a
/// task is assigned to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLoad {
    pub id: String,
    pub status: AgentState,
    pub active_tasks: Vec<String>,
    pub completed_tasks: u32,
    pub last_seen: String,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        for status in TaskStatus::ALL {
            assert_eq!(serde_json::to_value(status).unwrap(), status.as_str());
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("assigned".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_order() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::Low < TaskPriority::Medium);
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
        let parsed: TaskPriority = serde_json::from_value(serde_json::json!("critical")).unwrap();
        assert_eq!(parsed, TaskPriority::Critical);
    }

    #[test]
    fn test_task_serializes_type_field() {
        let task = Task::new(
            "Design login".to_string(),
            "Create technical design for login".to_string(),
            "design",
            TaskPriority::High,
            120,
            Vec::new(),
        );
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "design");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["estimated_duration"], 120);
        assert!(value.get("assigned_to").is_none());
        assert!(uuid::Uuid::parse_str(&task.id).is_ok());
    }
}
