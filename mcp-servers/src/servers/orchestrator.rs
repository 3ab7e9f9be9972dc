//! Orchestrator MCP server: epic breakdown, assignment and progress tracking
//! over the in-memory [`TaskStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::mcp::{arguments, prompt_messages, resource_contents, tool_failure, McpServer, Prompt, Resource, Tool};
use crate::orchestrator::{
    AgentState, AssignRequest, BreakdownRequest, Progress, ProgressRequest, ScheduleRequest, TaskStatus,
    TaskStore, WorkflowRequest,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrchestratorResource {
    TaskQueue,
    AgentStatus,
    ProjectTimeline,
    WorkflowDefinitions,
}

impl OrchestratorResource {
    const ALL: [Self; 4] = [
        Self::TaskQueue,
        Self::AgentStatus,
        Self::ProjectTimeline,
        Self::WorkflowDefinitions,
    ];

    fn uri(&self) -> &'static str {
        match self {
            Self::TaskQueue => "task-queue",
            Self::AgentStatus => "agent-status",
            Self::ProjectTimeline => "project-timeline",
            Self::WorkflowDefinitions => "workflow-definitions",
        }
    }

    fn parse(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.uri() == uri)
    }

    fn describe(&self) -> Resource {
        match self {
            Self::TaskQueue => Resource::json(
                self.uri(),
                "Task Queue",
                "Current task queue with status and assignments",
            ),
            Self::AgentStatus => Resource::json(self.uri(), "Agent Status", "Status and availability of all agents"),
            Self::ProjectTimeline => Resource::json(self.uri(), "Project Timeline", "Project milestones and timeline"),
            Self::WorkflowDefinitions => Resource::json(
                self.uri(),
                "Workflow Definitions",
                "Defined workflows and automation rules",
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrchestratorTool {
    BreakdownEpic,
    AssignTask,
    TrackProgress,
    ResolveDependencies,
    OptimizeSchedule,
    CreateWorkflow,
}

impl OrchestratorTool {
    const ALL: [Self; 6] = [
        Self::BreakdownEpic,
        Self::AssignTask,
        Self::TrackProgress,
        Self::ResolveDependencies,
        Self::OptimizeSchedule,
        Self::CreateWorkflow,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::BreakdownEpic => "breakdown_epic",
            Self::AssignTask => "assign_task",
            Self::TrackProgress => "track_progress",
            Self::ResolveDependencies => "resolve_dependencies",
            Self::OptimizeSchedule => "optimize_schedule",
            Self::CreateWorkflow => "create_workflow",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn describe(&self) -> Tool {
        let statuses: Vec<&str> = TaskStatus::ALL.iter().map(TaskStatus::as_str).collect();
        match self {
            Self::BreakdownEpic => Tool::new(
                self.name(),
                "Break down an epic into smaller, actionable tasks",
                json!({
                    "type": "object",
                    "properties": {
                        "epic_title": {"type": "string", "description": "Title of the epic to break down"},
                        "epic_description": {"type": "string", "description": "Detailed description of the epic"},
                        "acceptance_criteria": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Acceptance criteria for the epic"
                        },
                        "estimated_effort": {
                            "type": "string",
                            "description": "Estimated effort (S/M/L/XL)",
                            "enum": ["S", "M", "L", "XL"]
                        }
                    },
                    "required": ["epic_title", "epic_description"]
                }),
            ),
            Self::AssignTask => Tool::new(
                self.name(),
                "Assign a task to an agent or mark for manual assignment",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": {"type": "string", "description": "ID of the task to assign"},
                        "agent_id": {"type": "string", "description": "ID of the agent to assign to (optional)"},
                        "priority": {
                            "type": "string",
                            "enum": ["low", "medium", "high", "critical"],
                            "description": "Task priority"
                        },
                        "estimated_duration": {"type": "integer", "description": "Estimated duration in minutes"}
                    },
                    "required": ["task_id"]
                }),
            ),
            Self::TrackProgress => Tool::new(
                self.name(),
                "Track progress on current tasks and update status",
                json!({
                    "type": "object",
                    "properties": {
                        "session_id": {"type": "string", "description": "Current session identifier"},
                        "task_id": {"type": "string", "description": "Specific task to update (optional)"},
                        "status_update": {
                            "type": "string",
                            "enum": statuses,
                            "description": "New status for the task"
                        },
                        "notes": {"type": "string", "description": "Progress notes or comments"}
                    }
                }),
            ),
            Self::ResolveDependencies => Tool::new(
                self.name(),
                "Analyze and resolve task dependencies",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": {"type": "string", "description": "Task to analyze dependencies for"},
                        "auto_resolve": {
                            "type": "boolean",
                            "description": "Automatically resolve dependencies if possible",
                            "default": true
                        }
                    },
                    "required": ["task_id"]
                }),
            ),
            Self::OptimizeSchedule => Tool::new(
                self.name(),
                "Optimize task scheduling based on dependencies and resources",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": {"type": "string", "description": "Project to optimize schedule for"},
                        "target_date": {"type": "string", "format": "date", "description": "Target completion date"},
                        "available_agents": {
                            "type": "integer",
                            "description": "Number of available agents",
                            "default": 1
                        }
                    }
                }),
            ),
            Self::CreateWorkflow => Tool::new(
                self.name(),
                "Create a new automated workflow",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Workflow name"},
                        "description": {"type": "string", "description": "Workflow description"},
                        "trigger": {"type": "object", "description": "Workflow trigger conditions"},
                        "steps": {"type": "array", "items": {"type": "object"}, "description": "Workflow steps"}
                    },
                    "required": ["name", "trigger", "steps"]
                }),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrchestratorPrompt {
    PlanFeature,
    StatusReport,
    RebalanceWorkload,
}

impl OrchestratorPrompt {
    const ALL: [Self; 3] = [Self::PlanFeature, Self::StatusReport, Self::RebalanceWorkload];

    fn name(&self) -> &'static str {
        match self {
            Self::PlanFeature => "plan-feature",
            Self::StatusReport => "status-report",
            Self::RebalanceWorkload => "rebalance-workload",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn describe(&self) -> Prompt {
        match self {
            Self::PlanFeature => Prompt::new(
                self.name(),
                "Plan the implementation of a new feature",
                &[("feature_name", "Name of the feature to plan")],
            ),
            Self::StatusReport => Prompt::new(self.name(), "Generate a comprehensive status report", &[]),
            Self::RebalanceWorkload => {
                Prompt::new(self.name(), "Suggest workload rebalancing across agents", &[])
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResolveArgs {
    task_id: String,
    #[serde(default = "default_true")]
    auto_resolve: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct PlanFeatureArgs {
    feature_name: Option<String>,
}

/// Task and epic orchestration server.
pub struct OrchestratorServer {
    store: Arc<TaskStore>,
}

impl OrchestratorServer {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    async fn run_tool(&self, tool: OrchestratorTool, args: Value) -> Result<Value> {
        match tool {
            OrchestratorTool::BreakdownEpic => {
                let (epic, tasks) = self.store.breakdown_epic(arguments::<BreakdownRequest>(args)?).await?;
                Ok(json!({
                    "success": true,
                    "task_count": tasks.len(),
                    "epic": epic,
                    "tasks": tasks,
                }))
            }
            OrchestratorTool::AssignTask => {
                let (task, message) = self.store.assign_task(arguments::<AssignRequest>(args)?).await?;
                Ok(json!({ "success": true, "task": task, "message": message }))
            }
            OrchestratorTool::TrackProgress => {
                match self.store.track_progress(arguments::<ProgressRequest>(args)?).await {
                    Progress::Task(task) => Ok(json!({
                        "success": true,
                        "task": task,
                        "message": "Task progress updated",
                    })),
                    summary @ Progress::Summary { .. } => Ok(json!({
                        "success": true,
                        "progress": summary,
                        "message": "Progress tracked successfully",
                    })),
                }
            }
            OrchestratorTool::ResolveDependencies => {
                let args: ResolveArgs = arguments(args)?;
                let report = self.store.resolve_dependencies(&args.task_id, args.auto_resolve).await?;
                let message = if report.ready {
                    "All dependencies are completed".to_string()
                } else {
                    format!(
                        "{} unmet and {} unknown dependencies",
                        report.unmet.len(),
                        report.missing.len()
                    )
                };
                Ok(json!({ "success": true, "dependencies": report, "message": message }))
            }
            OrchestratorTool::OptimizeSchedule => {
                let schedule = self.store.optimize_schedule(arguments::<ScheduleRequest>(args)?).await?;
                Ok(json!({ "success": true, "schedule": schedule }))
            }
            OrchestratorTool::CreateWorkflow => {
                let workflow = self.store.create_workflow(arguments::<WorkflowRequest>(args)?).await?;
                Ok(json!({
                    "success": true,
                    "workflow": workflow,
                    "message": "Workflow created successfully",
                }))
            }
        }
    }

    async fn task_queue(&self) -> Value {
        let tasks = self.store.tasks().await;
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        json!({
            "total_tasks": tasks.len(),
            "pending": count(TaskStatus::Pending),
            "in_progress": count(TaskStatus::InProgress),
            "completed": count(TaskStatus::Completed),
            "tasks": tasks,
        })
    }

    async fn agent_status(&self) -> Value {
        let agents = self.store.agents().await;
        let count = |state: AgentState| agents.iter().filter(|a| a.status == state).count();
        json!({
            "total_agents": agents.len(),
            "available": count(AgentState::Available),
            "busy": count(AgentState::Busy),
            "agents": agents,
        })
    }

    async fn project_timeline(&self) -> Value {
        let tasks = self.store.tasks().await;

        let mut milestones = Vec::new();
        for epic in self.store.epics().await {
            let epic_tasks: Vec<_> = tasks.iter().filter(|t| epic.tasks.contains(&t.id)).collect();
            milestones.push(json!({
                "epic_id": epic.id,
                "title": epic.title,
                "status": self.store.epic_status(&epic).await,
                "estimated_effort": epic.estimated_effort,
                "task_count": epic_tasks.len(),
                "completed_tasks": epic_tasks.iter().filter(|t| t.status == TaskStatus::Completed).count(),
                "estimated_minutes": epic_tasks
                    .iter()
                    .filter_map(|t| t.estimated_duration)
                    .map(u64::from)
                    .sum::<u64>(),
                "created_at": epic.created_at,
            }));
        }

        let mut timeline: Vec<Value> = tasks
            .iter()
            .flat_map(|task| {
                task.progress_history.iter().map(move |entry| {
                    json!({
                        "timestamp": entry.timestamp,
                        "task_id": task.id,
                        "title": task.title,
                        "session_id": entry.session_id,
                        "notes": entry.notes,
                    })
                })
            })
            .collect();
        timeline.sort_by(|a, b| a["timestamp"].as_str().cmp(&b["timestamp"].as_str()));

        json!({
            "milestones": milestones,
            "timeline": timeline,
            "last_updated": chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn status_counts_line(&self) -> String {
        let counts = self.store.counts().await;
        let total: usize = counts.values().sum();
        let parts: Vec<String> = TaskStatus::ALL
            .iter()
            .map(|s| format!("{} {}", counts.get(s).copied().unwrap_or(0), s))
            .collect();
        format!("Current tasks: {} total ({}).", total, parts.join(", "))
    }
}

#[async_trait]
impl McpServer for OrchestratorServer {
    fn name(&self) -> &str {
        "orchestrator"
    }

    fn resources(&self) -> Vec<Resource> {
        OrchestratorResource::ALL.iter().map(OrchestratorResource::describe).collect()
    }

    fn tools(&self) -> Vec<Tool> {
        OrchestratorTool::ALL.iter().map(OrchestratorTool::describe).collect()
    }

    fn prompts(&self) -> Vec<Prompt> {
        OrchestratorPrompt::ALL.iter().map(OrchestratorPrompt::describe).collect()
    }

    async fn read_resource(&self, uri: &str) -> Result<Value> {
        let resource = OrchestratorResource::parse(uri)
            .ok_or_else(|| Error::NotFound(format!("Resource '{}'", uri)))?;
        let body = match resource {
            OrchestratorResource::TaskQueue => self.task_queue().await,
            OrchestratorResource::AgentStatus => self.agent_status().await,
            OrchestratorResource::ProjectTimeline => self.project_timeline().await,
            OrchestratorResource::WorkflowDefinitions => {
                let workflows = self.store.workflows().await;
                json!({ "total_workflows": workflows.len(), "workflows": workflows })
            }
        };
        resource_contents(uri, &body)
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        let tool = OrchestratorTool::parse(name).ok_or_else(|| Error::NotFound(format!("Tool '{}'", name)))?;
        match self.run_tool(tool, args).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(tool = tool.name(), error = %e, "orchestrator_tool_failed");
                Ok(tool_failure(e))
            }
        }
    }

    async fn get_prompt(&self, name: &str, args: Value) -> Result<Value> {
        let prompt = OrchestratorPrompt::parse(name).ok_or_else(|| Error::NotFound(format!("Prompt '{}'", name)))?;
        let text = match prompt {
            OrchestratorPrompt::PlanFeature => {
                let args: PlanFeatureArgs = arguments(args).unwrap_or_default();
                format!(
                    "Plan the implementation of the '{}' feature. Break it down into tasks, identify dependencies, and create a development roadmap.",
                    args.feature_name.as_deref().unwrap_or("new feature")
                )
            }
            OrchestratorPrompt::StatusReport => format!(
                "Generate a comprehensive status report including current tasks, progress, blockers, and next steps.\n\n{}",
                self.status_counts_line().await
            ),
            OrchestratorPrompt::RebalanceWorkload => {
                let loads: Vec<String> = self
                    .store
                    .agents()
                    .await
                    .iter()
                    .map(|a| format!("- {}: {} active, {} completed", a.id, a.active_tasks.len(), a.completed_tasks))
                    .collect();
                let mut text = "Analyze the current workload distribution and suggest rebalancing strategies to optimize productivity and meet deadlines.".to_string();
                if !loads.is_empty() {
                    text.push_str("\n\nAgent load:\n");
                    text.push_str(&loads.join("\n"));
                }
                text
            }
        };
        Ok(prompt_messages(text))
    }
}
