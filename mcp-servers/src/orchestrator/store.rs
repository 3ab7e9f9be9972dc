use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{
    now, AgentLoad, AgentState, Effort, Epic, ProgressEntry, Task, TaskPriority, TaskStatus, Workflow,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BreakdownRequest {
    pub epic_title: String,
    pub epic_description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub estimated_effort: Effort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub task_id: String,
    pub agent_id: Option<String>,
    pub priority: Option<TaskPriority>,
    pub estimated_duration: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressRequest {
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub status_update: Option<TaskStatus>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    pub project_id: Option<String>,
    /// `YYYY-MM-DD`
    pub target_date: Option<String>,
    pub available_agents: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: Value,
    pub steps: Vec<Value>,
}

/// Result of [`TaskStore::track_progress`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Progress {
    Task(Task),
    Summary {
        session_id: Option<String>,
        total_tasks: usize,
        completed_tasks: usize,
        in_progress_tasks: usize,
        pending_tasks: usize,
        blocked_tasks: usize,
        failed_tasks: usize,
        timestamp: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
    pub completed: Vec<String>,
    /// Known dependencies that are not completed yet.
    pub unmet: Vec<String>,
    /// Dependency ids with no task behind them.
    pub missing: Vec<String>,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<TaskStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub id: String,
    pub title: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub ready: bool,
    pub estimated_duration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    pub project_id: Option<String>,
    pub available_agents: u32,
    /// Ready tasks to start now, at most one per agent.
    pub first_wave: Vec<String>,
    pub order: Vec<ScheduledTask>,
    pub waiting: Vec<String>,
    pub total_estimated_minutes: u64,
    /// `None` when the estimate runs past the representable date range.
    pub estimated_completion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_track: Option<bool>,
}

/// Tasks without an estimate count this many minutes when scheduling.
const DEFAULT_TASK_MINUTES: u32 = 60;

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    /// Insertion order of `tasks`.
    task_order: Vec<String>,
    epics: Vec<Epic>,
    workflows: Vec<Workflow>,
    agents: BTreeMap<String, AgentLoad>,
}

impl State {
    fn insert_task(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.task_order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    fn ordered_tasks(&self) -> impl Iterator<Item = &Task> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    fn is_ready(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.status == TaskStatus::Completed)
        })
    }

    fn summary(&self, session_id: Option<String>) -> Progress {
        Progress::Summary {
            session_id,
            total_tasks: self.tasks.len(),
            completed_tasks: self.count(TaskStatus::Completed),
            in_progress_tasks: self.count(TaskStatus::InProgress),
            pending_tasks: self.count(TaskStatus::Pending),
            blocked_tasks: self.count(TaskStatus::Blocked),
            failed_tasks: self.count(TaskStatus::Failed),
            timestamp: now(),
        }
    }

    fn agent_took(&mut self, agent_id: &str, task_id: &str) {
        let agent = self
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentLoad {
                id: agent_id.to_string(),
                status: AgentState::Available,
                active_tasks: Vec::new(),
                completed_tasks: 0,
                last_seen: now(),
            });
        if !agent.active_tasks.iter().any(|t| t == task_id) {
            agent.active_tasks.push(task_id.to_string());
        }
        agent.status = AgentState::Busy;
        agent.last_seen = now();
    }

    fn agent_released(&mut self, agent_id: &str, task_id: &str, completed: bool) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.active_tasks.retain(|t| t != task_id);
            if completed {
                agent.completed_tasks += 1;
            }
            if agent.active_tasks.is_empty() {
                agent.status = AgentState::Available;
            }
            agent.last_seen = now();
        }
    }
}

/// Owned in-memory store behind the orchestrator tools.
#[derive(Default)]
pub struct TaskStore {
    state: RwLock<State>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Break an epic into design, implementation and test tasks plus one task
    /// per acceptance criterion. Criterion tasks depend on the design task.
    pub async fn breakdown_epic(&self, request: BreakdownRequest) -> Result<(Epic, Vec<Task>)> {
        let title = request.epic_title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("epic_title must not be empty".to_string()));
        }

        let design = Task::new(
            format!("Design {}", title),
            format!("Create technical design for {}", title),
            "design",
            TaskPriority::High,
            120,
            Vec::new(),
        );
        let design_id = design.id.clone();

        let mut tasks = vec![
            design,
            Task::new(
                format!("Implement {}", title),
                format!("Code implementation for {}", title),
                "implementation",
                TaskPriority::Medium,
                240,
                Vec::new(),
            ),
            Task::new(
                format!("Test {}", title),
                format!("Write and execute tests for {}", title),
                "testing",
                TaskPriority::Medium,
                90,
                Vec::new(),
            ),
        ];

        for criterion in &request.acceptance_criteria {
            tasks.push(Task::new(
                format!("Implement: {}", criterion),
                format!("Implement acceptance criterion: {}", criterion),
                "feature",
                TaskPriority::Medium,
                60,
                vec![design_id.clone()],
            ));
        }

        let epic = Epic {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: request.epic_description,
            acceptance_criteria: request.acceptance_criteria,
            estimated_effort: request.estimated_effort,
            tasks: tasks.iter().map(|t| t.id.clone()).collect(),
            status: TaskStatus::Pending,
            created_at: now(),
        };

        let mut state = self.state.write().await;
        for task in &tasks {
            state.insert_task(task.clone());
        }
        state.epics.push(epic.clone());

        info!(epic_id = %epic.id, title = %epic.title, task_count = tasks.len(), "epic_broken_down");

        Ok((epic, tasks))
    }

    /// Assign a task to an agent, or clear the assignee for manual pickup.
    /// Priority and estimate are only changed when given.
    pub async fn assign_task(&self, request: AssignRequest) -> Result<(Task, String)> {
        let mut state = self.state.write().await;

        let previous = state
            .tasks
            .get(&request.task_id)
            .ok_or_else(|| Error::NotFound("Task".to_string()))?
            .assigned_to
            .clone();

        if let Some(previous) = previous.as_deref() {
            if Some(previous) != request.agent_id.as_deref() {
                state.agent_released(previous, &request.task_id, false);
            }
        }
        if let Some(agent_id) = request.agent_id.as_deref() {
            state.agent_took(agent_id, &request.task_id);
        }

        let task = state
            .tasks
            .get_mut(&request.task_id)
            .ok_or_else(|| Error::NotFound("Task".to_string()))?;
        task.assigned_to = request.agent_id.clone();
        task.assigned_at = Some(now());
        if let Some(priority) = request.priority {
            task.priority = priority;
        }
        if let Some(minutes) = request.estimated_duration {
            task.estimated_duration = Some(minutes);
        }

        let message = format!(
            "Task assigned to {}",
            request.agent_id.as_deref().unwrap_or("manual assignment")
        );
        info!(
            task_id = %task.id,
            agent_id = request.agent_id.as_deref().unwrap_or("manual"),
            "task_assigned"
        );

        Ok((task.clone(), message))
    }

    /// Record progress on one task, or summarize all tasks when no known task
    /// is named.
    pub async fn track_progress(&self, request: ProgressRequest) -> Progress {
        let mut state = self.state.write().await;

        let task_id = match request.task_id.as_deref() {
            Some(id) if state.tasks.contains_key(id) => id.to_string(),
            other => {
                if let Some(id) = other {
                    warn!(task_id = %id, "progress_task_unknown");
                }
                return state.summary(request.session_id);
            }
        };

        let assignee = state.tasks.get(&task_id).and_then(|t| t.assigned_to.clone());
        if let (Some(agent_id), Some(status)) = (assignee.as_deref(), request.status_update) {
            if !status.is_open() {
                state.agent_released(agent_id, &task_id, status == TaskStatus::Completed);
            }
        }

        let entry = ProgressEntry {
            timestamp: now(),
            session_id: request.session_id.clone(),
            notes: request.notes,
        };

        match state.tasks.get_mut(&task_id) {
            Some(task) => {
                if let Some(status) = request.status_update {
                    task.status = status;
                }
                task.progress_history.push(entry);
                info!(task_id = %task.id, status = %task.status, "task_progress_tracked");
                Progress::Task(task.clone())
            }
            None => state.summary(request.session_id),
        }
    }

    /// Report the dependency state of a task. With `auto_resolve`, a blocked
    /// task whose dependencies are all completed goes back to pending and a
    /// pending task with unmet dependencies becomes blocked.
    pub async fn resolve_dependencies(&self, task_id: &str, auto_resolve: bool) -> Result<DependencyReport> {
        let mut state = self.state.write().await;

        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::NotFound("Task".to_string()))?;

        let mut completed = Vec::new();
        let mut unmet = Vec::new();
        let mut missing = Vec::new();
        for dep in &task.dependencies {
            match state.tasks.get(dep) {
                Some(d) if d.status == TaskStatus::Completed => completed.push(dep.clone()),
                Some(_) => unmet.push(dep.clone()),
                None => missing.push(dep.clone()),
            }
        }
        let ready = unmet.is_empty() && missing.is_empty();
        let dependencies = task.dependencies.clone();
        let current = task.status;

        let next = match (auto_resolve, ready, current) {
            (true, true, TaskStatus::Blocked) => Some(TaskStatus::Pending),
            (true, false, TaskStatus::Pending) => Some(TaskStatus::Blocked),
            _ => None,
        };

        let mut status = current;
        if let Some(next) = next {
            if let Some(task) = state.tasks.get_mut(task_id) {
                task.status = next;
            }
            status = next;
            info!(task_id = %task_id, from = %current, to = %next, "task_dependencies_resolved");
        }

        Ok(DependencyReport {
            task_id: task_id.to_string(),
            status,
            dependencies,
            completed,
            unmet,
            missing,
            ready,
            previous_status: next.map(|_| current),
        })
    }

    /// Order open tasks: ready tasks first, then by priority (highest first),
    /// then by creation order. The first wave takes one ready task per agent.
    pub async fn optimize_schedule(&self, request: ScheduleRequest) -> Result<Schedule> {
        let agents = request.available_agents.unwrap_or(1).max(1);
        let target = request
            .target_date
            .as_deref()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| Error::InvalidArgument(format!("target_date '{}': {}", d, e)))
            })
            .transpose()?;

        let state = self.state.read().await;

        let mut order: Vec<(usize, ScheduledTask)> = state
            .ordered_tasks()
            .enumerate()
            .filter(|(_, t)| t.status.is_open())
            .map(|(position, t)| {
                (
                    position,
                    ScheduledTask {
                        id: t.id.clone(),
                        title: t.title.clone(),
                        priority: t.priority,
                        status: t.status,
                        ready: state.is_ready(t) && t.status != TaskStatus::Blocked,
                        estimated_duration: t.estimated_duration,
                    },
                )
            })
            .collect();

        order.sort_by(|(pa, a), (pb, b)| {
            b.ready
                .cmp(&a.ready)
                .then(b.priority.cmp(&a.priority))
                .then(pa.cmp(pb))
        });
        let order: Vec<ScheduledTask> = order.into_iter().map(|(_, t)| t).collect();

        let first_wave = order
            .iter()
            .filter(|t| t.ready)
            .take(agents as usize)
            .map(|t| t.id.clone())
            .collect();
        let waiting = order.iter().filter(|t| !t.ready).map(|t| t.id.clone()).collect();

        let total_estimated_minutes: u64 = order
            .iter()
            .map(|t| u64::from(t.estimated_duration.unwrap_or(DEFAULT_TASK_MINUTES)))
            .sum();
        let wall_minutes = total_estimated_minutes.div_ceil(u64::from(agents));
        let completion = i64::try_from(wall_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|d| Utc::now().checked_add_signed(d));
        if completion.is_none() {
            warn!(total_minutes = total_estimated_minutes, "schedule_completion_out_of_range");
        }

        let on_track = target
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .map(|end| completion.is_some_and(|c| c.naive_utc() <= end));

        info!(
            open_tasks = order.len(),
            agents = agents,
            total_minutes = total_estimated_minutes,
            "schedule_optimized"
        );

        Ok(Schedule {
            project_id: request.project_id,
            available_agents: agents,
            first_wave,
            order,
            waiting,
            total_estimated_minutes,
            estimated_completion: completion.map(|c| c.to_rfc3339()),
            target_date: request.target_date,
            on_track,
        })
    }

    pub async fn create_workflow(&self, request: WorkflowRequest) -> Result<Workflow> {
        if request.name.trim().is_empty() {
            return Err(Error::InvalidArgument("name must not be empty".to_string()));
        }
        if !request.trigger.is_object() {
            return Err(Error::InvalidArgument("trigger must be an object".to_string()));
        }

        let workflow = Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            trigger: request.trigger,
            steps: request.steps,
            created_at: now(),
            status: "active".to_string(),
        };
        self.state.write().await.workflows.push(workflow.clone());

        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow_created");
        Ok(workflow)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    /// Tasks in creation order.
    pub async fn tasks(&self) -> Vec<Task> {
        self.state.read().await.ordered_tasks().cloned().collect()
    }

    pub async fn epics(&self) -> Vec<Epic> {
        self.state.read().await.epics.clone()
    }

    pub async fn workflows(&self) -> Vec<Workflow> {
        self.state.read().await.workflows.clone()
    }

    /// Agents sorted by id.
    pub async fn agents(&self) -> Vec<AgentLoad> {
        self.state.read().await.agents.values().cloned().collect()
    }

    pub async fn counts(&self) -> HashMap<TaskStatus, usize> {
        let state = self.state.read().await;
        TaskStatus::ALL.into_iter().map(|s| (s, state.count(s))).collect()
    }

    /// Epic status derived from its tasks: completed
    /// when all are, blocked or failed when any is, in progress once any
    /// task has moved.
    pub async fn epic_status(&self, epic: &Epic) -> TaskStatus {
        let state = self.state.read().await;
        let statuses: HashSet<TaskStatus> = epic
            .tasks
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .map(|t| t.status)
            .collect();

        if statuses.is_empty() {
            epic.status
        } else if statuses.contains(&TaskStatus::Failed) {
            TaskStatus::Failed
        } else if statuses.contains(&TaskStatus::Blocked) {
            TaskStatus::Blocked
        } else if statuses.len() == 1 && statuses.contains(&TaskStatus::Completed) {
            TaskStatus::Completed
        } else if statuses.len() == 1 && statuses.contains(&TaskStatus::Pending) {
            TaskStatus::Pending
        } else {
            TaskStatus::InProgress
        }
    }
}
