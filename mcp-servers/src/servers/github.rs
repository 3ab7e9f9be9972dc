//! GitHub integration MCP server.
//!
//! Connects Studio projects to repositories, creates issues and PRs on
//! behalf of agents, manages repository hooks and reports PR metrics. The
//! same process serves the webhook endpoint, sharing its automation config
//! store and agent registry with the tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::automation::{AgentAssignment, AgentRegistry, PrAutomationConfig, PrConfigStore};
use crate::cache::{self, Cache, REPO_CONFIG_TTL, WEBHOOK_CONFIG_TTL};
use crate::config::Config;
use crate::events::{Dispatcher, WebhookEvent};
use crate::github::{GitHubClient, HookSpec, NewIssue, NewPullRequest, Repository};
use crate::mcp::{self, arguments, prompt_messages, resource_contents, tool_failure, McpServer, Prompt, Resource, Tool};
use crate::metrics::{analyze_repository, generate_insights, MetricsInclude};
use crate::studio::{value_id, RepoConnection, StudioClient, REPO_CONFIG_PREFIX};
use crate::web::{self, WebhookState};
use crate::{Error, Result};

pub const WEBHOOK_CONFIG_PREFIX: &str = "webhook:config:";

const WEBHOOK_PATH: &str = "/webhooks/github";
const STUDIO_PORT: u16 = 3000;
const GITHUB_SERVER_PORT: u16 = 8002;

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitHubResource {
    Repositories,
    Webhooks,
    PrAutomation,
    AgentMappings,
    IssueTemplates,
}

impl GitHubResource {
    const ALL: [Self; 5] = [
        Self::Repositories,
        Self::Webhooks,
        Self::PrAutomation,
        Self::AgentMappings,
        Self::IssueTemplates,
    ];

    fn uri(&self) -> &'static str {
        match self {
            Self::Repositories => "repositories",
            Self::Webhooks => "webhooks",
            Self::PrAutomation => "pr-automation",
            Self::AgentMappings => "agent-mappings",
            Self::IssueTemplates => "issue-templates",
        }
    }

    fn parse(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.uri() == uri)
    }

    fn describe(&self) -> Resource {
        let (name, description) = match self {
            Self::Repositories => ("GitHub Repositories", "List of connected GitHub repositories"),
            Self::Webhooks => (
                "Webhook Configurations",
                "Active webhook configurations and event subscriptions",
            ),
            Self::PrAutomation => ("PR Automation Rules", "Pull request automation configurations"),
            Self::AgentMappings => ("Agent GitHub Mappings", "Mappings between Studio agents and GitHub users"),
            Self::IssueTemplates => ("Issue Templates", "Templates for creating GitHub issues"),
        };
        Resource::json(self.uri(), name, description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitHubTool {
    ConnectRepository,
    CreateIssueFromSlack,
    CreateAutomatedPr,
    ManagePrReviewers,
    AssignAgentToIssue,
    ConfigurePrAutomation,
    SetupWebhooks,
    AnalyzePrMetrics,
}

impl GitHubTool {
    const ALL: [Self; 8] = [
        Self::ConnectRepository,
        Self::CreateIssueFromSlack,
        Self::CreateAutomatedPr,
        Self::ManagePrReviewers,
        Self::AssignAgentToIssue,
        Self::ConfigurePrAutomation,
        Self::SetupWebhooks,
        Self::AnalyzePrMetrics,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::ConnectRepository => "connect_repository",
            Self::CreateIssueFromSlack => "create_issue_from_slack",
            Self::CreateAutomatedPr => "create_automated_pr",
            Self::ManagePrReviewers => "manage_pr_reviewers",
            Self::AssignAgentToIssue => "assign_agent_to_issue",
            Self::ConfigurePrAutomation => "configure_pr_automation",
            Self::SetupWebhooks => "setup_webhooks",
            Self::AnalyzePrMetrics => "analyze_pr_metrics",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn describe(&self) -> Tool {
        let project_id = json!({"type": "string", "description": "Studio project ID"});
        match self {
            Self::ConnectRepository => Tool::new(
                self.name(),
                "Connect a GitHub repository to a Studio project",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "repo_owner": {"type": "string", "description": "GitHub repository owner (user or organization)"},
                        "repo_name": {"type": "string", "description": "GitHub repository name"},
                        "setup_webhooks": {"type": "boolean", "description": "Automatically setup webhooks", "default": true}
                    },
                    "required": ["project_id", "repo_owner", "repo_name"]
                }),
            ),
            Self::CreateIssueFromSlack => Tool::new(
                self.name(),
                "Create a GitHub issue from a Slack message",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Issue title"},
                        "body": {"type": "string", "description": "Issue description"},
                        "labels": {"type": "array", "items": {"type": "string"}, "description": "Labels to apply"},
                        "assignees": {"type": "array", "items": {"type": "string"}, "description": "GitHub usernames to assign"},
                        "project_id": project_id,
                        "slack_context": {"type": "object", "description": "Slack message context"}
                    },
                    "required": ["title", "body", "project_id", "slack_context"]
                }),
            ),
            Self::CreateAutomatedPr => Tool::new(
                self.name(),
                "Create an automated pull request with agent assignments",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "title": {"type": "string", "description": "PR title"},
                        "body": {"type": "string", "description": "PR description"},
                        "base_branch": {"type": "string", "description": "Base branch", "default": "main"},
                        "head_branch": {"type": "string", "description": "Head branch"},
                        "task_id": {"type": "string", "description": "Associated Studio task ID"},
                        "agent_id": {"type": "string", "description": "Agent creating the PR"},
                        "draft": {"type": "boolean", "description": "Create as draft PR", "default": false}
                    },
                    "required": ["project_id", "title", "head_branch"]
                }),
            ),
            Self::ManagePrReviewers => Tool::new(
                self.name(),
                "Manage PR reviewers and assignments",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "pr_number": {"type": "integer", "description": "Pull request number"},
                        "action": {
                            "type": "string",
                            "enum": ["add", "remove", "request_review"],
                            "description": "Action to perform"
                        },
                        "reviewers": {"type": "array", "items": {"type": "string"}, "description": "GitHub usernames"},
                        "team_reviewers": {"type": "array", "items": {"type": "string"}, "description": "GitHub team slugs"}
                    },
                    "required": ["project_id", "pr_number", "action"]
                }),
            ),
            Self::AssignAgentToIssue => Tool::new(
                self.name(),
                "Assign a Studio agent to a GitHub issue",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "issue_number": {"type": "integer", "description": "GitHub issue number"},
                        "agent_id": {"type": "string", "description": "Studio agent ID"},
                        "create_task": {"type": "boolean", "description": "Create a Studio task for this issue", "default": true},
                        "priority": {
                            "type": "string",
                            "enum": ["low", "medium", "high", "urgent"],
                            "description": "Task priority"
                        }
                    },
                    "required": ["project_id", "issue_number", "agent_id"]
                }),
            ),
            Self::ConfigurePrAutomation => Tool::new(
                self.name(),
                "Configure PR automation rules for a repository",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "auto_assign": {"type": "boolean", "description": "Enable auto-assignment"},
                        "auto_label": {"type": "boolean", "description": "Enable auto-labeling"},
                        "require_reviews": {"type": "integer", "description": "Required number of reviews"},
                        "protected_branches": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Protected branch patterns"
                        },
                        "draft_on_wip": {"type": "boolean", "description": "Convert to draft if WIP in title"},
                        "close_stale_after_days": {"type": "integer", "description": "Days after which an open PR counts as stale"}
                    },
                    "required": ["project_id"]
                }),
            ),
            Self::SetupWebhooks => Tool::new(
                self.name(),
                "Setup GitHub webhooks for a repository",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "events": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "GitHub events to subscribe to",
                            "default": WebhookEvent::default_subscriptions()
                        },
                        "active": {"type": "boolean", "description": "Whether webhook is active", "default": true}
                    },
                    "required": ["project_id"]
                }),
            ),
            Self::AnalyzePrMetrics => Tool::new(
                self.name(),
                "Analyze PR metrics and generate insights",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": project_id,
                        "timeframe_days": {"type": "integer", "description": "Number of days to analyze", "default": 30},
                        "metrics": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Metrics to include",
                            "default": ["merge_time", "review_time", "comments", "changes"]
                        }
                    },
                    "required": ["project_id"]
                }),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitHubPrompt {
    PrDescription,
    IssueTriage,
    CodeReview,
}

impl GitHubPrompt {
    const ALL: [Self; 3] = [Self::PrDescription, Self::IssueTriage, Self::CodeReview];

    fn name(&self) -> &'static str {
        match self {
            Self::PrDescription => "pr-description",
            Self::IssueTriage => "issue-triage",
            Self::CodeReview => "code-review",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn describe(&self) -> Prompt {
        match self {
            Self::PrDescription => Prompt::new(
                self.name(),
                "Generate a comprehensive PR description",
                &[("changes", "Summary of changes"), ("task_context", "Related task information")],
            ),
            Self::IssueTriage => Prompt::new(
                self.name(),
                "Triage and categorize a GitHub issue",
                &[("issue_body", "Issue description"), ("repository_context", "Repository information")],
            ),
            Self::CodeReview => Prompt::new(
                self.name(),
                "Generate code review comments",
                &[("diff", "Code diff to review"), ("pr_context", "PR context and description")],
            ),
        }
    }
}

// =============================================================================
// Arguments
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_timeframe() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
struct ConnectArgs {
    project_id: String,
    repo_owner: String,
    repo_name: String,
    #[serde(default = "default_true")]
    setup_webhooks: bool,
}

#[derive(Debug, Deserialize)]
struct SlackContext {
    slack_user_id: String,
    slack_channel_id: String,
    slack_message_ts: String,
}

#[derive(Debug, Deserialize)]
struct SlackIssueArgs {
    project_id: String,
    title: String,
    body: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignees: Vec<String>,
    slack_context: SlackContext,
}

#[derive(Debug, Deserialize)]
struct AutomatedPrArgs {
    project_id: String,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default = "default_base_branch")]
    base_branch: String,
    head_branch: String,
    task_id: Option<String>,
    agent_id: Option<String>,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReviewerAction {
    Add,
    Remove,
    RequestReview,
}

#[derive(Debug, Deserialize)]
struct ReviewersArgs {
    project_id: String,
    pr_number: u64,
    action: ReviewerAction,
    #[serde(default)]
    reviewers: Vec<String>,
    #[serde(default)]
    team_reviewers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum IssuePriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl IssuePriority {
    /// Priority as the Studio backend spells it.
    fn studio(&self) -> &'static str {
        match self {
            IssuePriority::Low => "LOW",
            IssuePriority::Medium => "MEDIUM",
            IssuePriority::High => "HIGH",
            IssuePriority::Urgent => "URGENT",
        }
    }
}

#[derive(Debug, Deserialize)]
struct AssignAgentArgs {
    project_id: String,
    issue_number: u64,
    agent_id: String,
    #[serde(default = "default_true")]
    create_task: bool,
    #[serde(default)]
    priority: IssuePriority,
}

#[derive(Debug, Deserialize)]
struct ConfigureArgs {
    project_id: String,
    auto_assign: Option<bool>,
    auto_label: Option<bool>,
    require_reviews: Option<u32>,
    protected_branches: Option<Vec<String>>,
    draft_on_wip: Option<bool>,
    close_stale_after_days: Option<u32>,
}

impl ConfigureArgs {
    fn apply(self, mut config: PrAutomationConfig) -> PrAutomationConfig {
        if let Some(v) = self.auto_assign {
            config.auto_assign = v;
        }
        if let Some(v) = self.auto_label {
            config.auto_label = v;
        }
        if let Some(v) = self.require_reviews {
            config.require_reviews = v;
        }
        if let Some(v) = self.protected_branches {
            config.protected_branches = v;
        }
        if let Some(v) = self.draft_on_wip {
            config.draft_on_wip = v;
        }
        if let Some(v) = self.close_stale_after_days {
            config.close_stale_after_days = v;
        }
        config
    }
}

#[derive(Debug, Deserialize)]
struct SetupWebhooksArgs {
    project_id: String,
    events: Option<Vec<String>>,
    #[serde(default = "default_true")]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct MetricsArgs {
    project_id: String,
    #[serde(default = "default_timeframe")]
    timeframe_days: u32,
    metrics: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PrDescriptionArgs {
    #[serde(default)]
    changes: String,
    #[serde(default)]
    task_context: Value,
}

#[derive(Debug, Default, Deserialize)]
struct IssueTriageArgs {
    #[serde(default)]
    issue_body: String,
    #[serde(default)]
    repository_context: Value,
}

#[derive(Debug, Default, Deserialize)]
struct CodeReviewArgs {
    #[serde(default)]
    diff: String,
    #[serde(default)]
    pr_context: Value,
}

/// Repository hook registered by `setup_webhooks`, cached under
/// `webhook:config:<project_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub project_id: String,
    pub repo_id: String,
    pub webhook_id: u64,
    pub webhook_url: String,
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: String,
}

// =============================================================================
// Server
// =============================================================================

/// Public URL GitHub should deliver webhooks to.
///
/// Uses the configured URL when present. Otherwise the Studio API URL is
/// reused with port 3000 swapped for this server's port 8002.
pub fn webhook_url(config: &Config) -> Result<String> {
    if let Some(public) = &config.webhook_public_url {
        let public = public.trim_end_matches('/');
        if public.ends_with(WEBHOOK_PATH) {
            return Ok(public.to_string());
        }
        return Ok(format!("{}{}", public, WEBHOOK_PATH));
    }

    let raw = config.studio_api_url.trim();
    let raw = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let mut url = url::Url::parse(&raw)
        .map_err(|e| Error::Config(format!("STUDIO_API_URL '{}': {}", config.studio_api_url, e)))?;
    if url.port() == Some(STUDIO_PORT) {
        url.set_port(Some(GITHUB_SERVER_PORT))
            .map_err(|_| Error::Config(format!("STUDIO_API_URL '{}' cannot carry a port", raw)))?;
    }

    Ok(format!("{}{}", url.as_str().trim_end_matches('/'), WEBHOOK_PATH))
}

/// GitHub integration server.
pub struct GitHubServer {
    github: Option<GitHubClient>,
    studio: StudioClient,
    cache: Arc<dyn Cache>,
    pr_configs: Arc<PrConfigStore>,
    agents: Arc<AgentRegistry>,
    dispatcher: Dispatcher,
    webhook_url: String,
    webhook_secret: Option<String>,
}

impl GitHubServer {
    pub fn new(
        config: &Config,
        github: Option<GitHubClient>,
        studio: StudioClient,
        cache: Arc<dyn Cache>,
    ) -> Result<Self> {
        let pr_configs = Arc::new(PrConfigStore::new(
            cache.clone(),
            PrAutomationConfig::from(&config.automation),
        ));
        let agents = Arc::new(AgentRegistry::new());
        let dispatcher = Dispatcher::new(
            github.clone(),
            studio.clone(),
            cache.clone(),
            pr_configs.clone(),
            agents.clone(),
            config.webhook_store_events,
        );

        Ok(Self {
            github,
            studio,
            cache,
            pr_configs,
            agents,
            dispatcher,
            webhook_url: webhook_url(config)?,
            webhook_secret: config.github_webhook_secret.clone(),
        })
    }

    /// Build the server and its API clients from configuration.
    pub fn from_config(config: &Config, cache: Arc<dyn Cache>) -> Result<Self> {
        let github = match &config.github_token {
            Some(token) => Some(GitHubClient::with_base_url(
                config.github_api_url.as_str(),
                config.github_api_version.as_str(),
                token.as_str(),
            )?),
            None => {
                warn!("github_token_missing");
                None
            }
        };
        let studio = StudioClient::new(
            config.studio_api_url.as_str(),
            config.studio_api_key.clone(),
            config.studio_api_timeout,
        )?;
        Self::new(config, github, studio, cache)
    }

    pub fn webhook_state(&self) -> WebhookState {
        WebhookState::new(self.webhook_secret.clone(), self.dispatcher.clone())
    }

    fn github(&self) -> Result<&GitHubClient> {
        self.github
            .as_ref()
            .ok_or_else(|| Error::Config("GITHUB_TOKEN is not configured".to_string()))
    }

    /// The repository attached to a Studio project.
    async fn project_repository(&self, project_id: &str) -> Result<Repository> {
        let project = self.studio.get_project(project_id).await?;
        let repo_id = project.repo_id().ok_or(Error::NotConnected)?;
        self.github()?.get_repo_by_id(repo_id).await
    }

    async fn run_tool(&self, tool: GitHubTool, args: Value) -> Result<Value> {
        match tool {
            GitHubTool::ConnectRepository => self.connect_repository(arguments(args)?).await,
            GitHubTool::CreateIssueFromSlack => self.create_issue_from_slack(arguments(args)?).await,
            GitHubTool::CreateAutomatedPr => self.create_automated_pr(arguments(args)?).await,
            GitHubTool::ManagePrReviewers => self.manage_pr_reviewers(arguments(args)?).await,
            GitHubTool::AssignAgentToIssue => self.assign_agent_to_issue(arguments(args)?).await,
            GitHubTool::ConfigurePrAutomation => self.configure_pr_automation(arguments(args)?).await,
            GitHubTool::SetupWebhooks => {
                let args: SetupWebhooksArgs = arguments(args)?;
                let repo = self.project_repository(&args.project_id).await?;
                let events = args.events.unwrap_or_else(WebhookEvent::default_subscriptions);
                self.install_webhook(&args.project_id, &repo, events, args.active).await
            }
            GitHubTool::AnalyzePrMetrics => self.analyze_pr_metrics(arguments(args)?).await,
        }
    }

    // =========================================================================
    // Tools
    // =========================================================================

    async fn connect_repository(&self, args: ConnectArgs) -> Result<Value> {
        let repo = self.github()?.get_repo(&args.repo_owner, &args.repo_name).await?;

        self.studio
            .update_project(
                &args.project_id,
                &json!({
                    "githubRepoId": repo.id.to_string(),
                    "githubRepoName": repo.name,
                    "githubOwner": repo.owner.login,
                }),
            )
            .await?;

        let webhook = if args.setup_webhooks {
            match self
                .install_webhook(&args.project_id, &repo, WebhookEvent::default_subscriptions(), true)
                .await
            {
                Ok(result) => result.get("webhook").cloned(),
                Err(e) => {
                    warn!(repo = %repo.full_name, error = %e, "webhook_setup_failed");
                    None
                }
            }
        } else {
            None
        };

        let connection = RepoConnection {
            project_id: args.project_id.clone(),
            repo_id: repo.id.to_string(),
            repo_name: repo.name.clone(),
            full_name: repo.full_name.clone(),
            owner: repo.owner.login.clone(),
            default_branch: repo.default_branch.clone(),
            private: repo.private,
            connected_at: Utc::now().to_rfc3339(),
        };
        cache::put_json(
            self.cache.as_ref(),
            &format!("{}{}", REPO_CONFIG_PREFIX, args.project_id),
            REPO_CONFIG_TTL,
            &connection,
        )
        .await?;

        info!(project_id = %args.project_id, repo = %repo.full_name, "repository_connected");

        Ok(json!({
            "success": true,
            "repository": {
                "id": repo.id,
                "full_name": repo.full_name,
                "html_url": repo.html_url,
                "default_branch": repo.default_branch,
                "private": repo.private,
            },
            "webhook": webhook,
            "message": format!("Successfully connected {} to project", repo.full_name),
        }))
    }

    async fn create_issue_from_slack(&self, args: SlackIssueArgs) -> Result<Value> {
        let repo = self.project_repository(&args.project_id).await?;

        let body = format!(
            "{}\n\n---\n**Created from Slack**\n- User: <@{}>\n- Channel: <#{}>\n- Message: {}\n",
            args.body,
            args.slack_context.slack_user_id,
            args.slack_context.slack_channel_id,
            args.slack_context.slack_message_ts
        );

        let issue = self
            .github()?
            .create_issue(
                &repo.full_name,
                &NewIssue {
                    title: args.title.clone(),
                    body: body.clone(),
                    labels: args.labels,
                    assignees: args.assignees,
                    milestone: None,
                },
            )
            .await?;

        let task = json!({
            "title": args.title,
            "description": body,
            "projectId": args.project_id,
            "type": "FEATURE",
            "status": "PENDING",
            "githubIssueId": issue.id,
            "githubIssueNumber": issue.number,
            "metadata": {
                "source": "slack",
                "slack_user_id": args.slack_context.slack_user_id,
                "slack_channel_id": args.slack_context.slack_channel_id,
                "slack_message_ts": args.slack_context.slack_message_ts,
            }
        });
        let task_id = match self.studio.create_task(&task).await {
            Ok(id) => id,
            Err(e) => {
                warn!(repo = %repo.full_name, number = issue.number, error = %e, "slack_issue_task_failed");
                None
            }
        };

        info!(
            repo = %repo.full_name,
            number = issue.number,
            slack_user_id = %args.slack_context.slack_user_id,
            "slack_issue_created"
        );

        Ok(json!({
            "success": true,
            "issue": {
                "number": issue.number,
                "title": issue.title,
                "html_url": issue.html_url,
                "state": issue.state,
            },
            "task_id": task_id,
            "message": format!("Created issue #{}: {}", issue.number, issue.title),
        }))
    }

    async fn create_automated_pr(&self, args: AutomatedPrArgs) -> Result<Value> {
        let repo = self.project_repository(&args.project_id).await?;
        let github = self.github()?;

        let mut body = args.body;
        if let Some(task_id) = &args.task_id {
            match self.studio.get_task(task_id).await {
                Ok(task) => body.push_str(&related_task_section(task_id, &task)),
                Err(e) => warn!(task_id = %task_id, error = %e, "pr_task_lookup_failed"),
            }
        }
        if let Some(agent_id) = &args.agent_id {
            match self.studio.get_agent(agent_id).await {
                Ok(agent) => body.push_str(&agent_attribution(agent_id, &agent)),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "pr_agent_lookup_failed"),
            }
        }

        let pr = github
            .create_pull(
                &repo.full_name,
                &NewPullRequest {
                    title: args.title,
                    body,
                    base: args.base_branch,
                    head: args.head_branch,
                    draft: args.draft,
                },
            )
            .await?;

        let config = self.pr_configs.get(&repo.id.to_string()).await;
        if config.auto_label {
            self.dispatcher.label_pull_request(&repo, &pr).await;
        }

        if let Some(task_id) = &args.task_id {
            let patch = json!({
                "githubPrId": pr.id,
                "githubPrNumber": pr.number,
                "status": "IN_PROGRESS",
            });
            if let Err(e) = self.studio.update_task(task_id, &patch).await {
                warn!(task_id = %task_id, error = %e, "pr_task_update_failed");
            }
        }

        info!(repo = %repo.full_name, number = pr.number, draft = pr.draft, "automated_pr_created");

        Ok(json!({
            "success": true,
            "pr": {
                "number": pr.number,
                "title": pr.title,
                "html_url": pr.html_url,
                "state": pr.state,
                "draft": pr.draft,
            },
            "message": format!("Created PR #{}: {}", pr.number, pr.title),
        }))
    }

    async fn manage_pr_reviewers(&self, args: ReviewersArgs) -> Result<Value> {
        if args.reviewers.is_empty() && args.team_reviewers.is_empty() {
            return Err(Error::InvalidArgument(
                "reviewers or team_reviewers must not be empty".to_string(),
            ));
        }

        let repo = self.project_repository(&args.project_id).await?;
        let github = self.github()?;
        let count = args.reviewers.len() + args.team_reviewers.len();

        let message = match args.action {
            ReviewerAction::Add | ReviewerAction::RequestReview => {
                github
                    .request_reviewers(&repo.full_name, args.pr_number, &args.reviewers, &args.team_reviewers)
                    .await?;
                format!("Requested review from {} reviewers on PR #{}", count, args.pr_number)
            }
            ReviewerAction::Remove => {
                github
                    .remove_requested_reviewers(
                        &repo.full_name,
                        args.pr_number,
                        &args.reviewers,
                        &args.team_reviewers,
                    )
                    .await?;
                format!("Removed {} reviewers from PR #{}", count, args.pr_number)
            }
        };

        info!(repo = %repo.full_name, number = args.pr_number, action = ?args.action, "pr_reviewers_managed");

        Ok(json!({
            "success": true,
            "pr_number": args.pr_number,
            "reviewers": args.reviewers,
            "team_reviewers": args.team_reviewers,
            "message": message,
        }))
    }

    async fn assign_agent_to_issue(&self, args: AssignAgentArgs) -> Result<Value> {
        let repo = self.project_repository(&args.project_id).await?;
        let github = self.github()?;
        let issue = github.get_issue(&repo.full_name, args.issue_number).await?;

        let agent = AgentAssignment::from_studio(&args.agent_id, &self.studio.get_agent(&args.agent_id).await?);
        self.agents.register(agent.clone()).await;

        github
            .create_comment(&repo.full_name, issue.number, &agent.assignment_comment())
            .await?;
        if let Some(label) = &agent.github_label {
            github.add_labels(&repo.full_name, issue.number, &[label.clone()]).await?;
        }
        if let Some(username) = &agent.github_username {
            github.add_assignees(&repo.full_name, issue.number, &[username.clone()]).await?;
        }

        let task_id = if args.create_task {
            let query = [
                ("projectId", args.project_id.clone()),
                ("githubIssueId", issue.id.to_string()),
            ];
            let existing = self.studio.find_tasks(&query).await?.first().and_then(value_id);
            match existing {
                Some(task_id) => {
                    self.studio
                        .update_task(
                            &task_id,
                            &json!({
                                "agentId": args.agent_id,
                                "priority": args.priority.studio(),
                                "status": "IN_PROGRESS",
                            }),
                        )
                        .await?;
                    Some(task_id)
                }
                None => {
                    self.studio
                        .create_task(&json!({
                            "title": issue.title,
                            "description": issue.body.clone().unwrap_or_default(),
                            "projectId": args.project_id,
                            "agentId": args.agent_id,
                            "type": "FEATURE",
                            "status": "IN_PROGRESS",
                            "priority": args.priority.studio(),
                            "githubIssueId": issue.id,
                            "githubIssueNumber": issue.number,
                        }))
                        .await?
                }
            }
        } else {
            None
        };

        info!(repo = %repo.full_name, number = issue.number, agent_id = %agent.agent_id, "agent_assigned_to_issue");

        Ok(json!({
            "success": true,
            "issue": {
                "number": issue.number,
                "title": issue.title,
                "assignee": agent.agent_name,
            },
            "task_id": task_id,
            "message": format!("Assigned agent {} to issue #{}", agent.agent_name, issue.number),
        }))
    }

    async fn configure_pr_automation(&self, args: ConfigureArgs) -> Result<Value> {
        let project = self.studio.get_project(&args.project_id).await?;
        let repo_id = project.repo_id().ok_or(Error::NotConnected)?.to_string();

        let project_id = args.project_id.clone();
        let config = args.apply(self.pr_configs.get(&repo_id).await);
        self.pr_configs.put(&repo_id, config.clone()).await?;

        info!(project_id = %project_id, repo_id = %repo_id, "pr_automation_configured");

        Ok(json!({
            "success": true,
            "repo_id": repo_id,
            "config": config,
            "message": format!("PR automation configured for project {}", project_id),
        }))
    }

    /// Create the repository hook, or update the one already pointing at our
    /// URL, and remember it under `webhook:config:<project_id>`.
    async fn install_webhook(
        &self,
        project_id: &str,
        repo: &Repository,
        events: Vec<String>,
        active: bool,
    ) -> Result<Value> {
        let github = self.github()?;

        let existing = match github.list_hooks(&repo.full_name).await {
            Ok(hooks) => hooks
                .into_iter()
                .find(|h| h.config.url.as_deref() == Some(self.webhook_url.as_str())),
            Err(e) => {
                warn!(repo = %repo.full_name, error = %e, "webhook_list_failed");
                None
            }
        };

        let spec = HookSpec::web(&self.webhook_url, self.webhook_secret.as_deref(), events.clone(), active);
        let (hook, action) = match existing {
            Some(hook) => (github.update_hook(&repo.full_name, hook.id, &spec).await?, "updated"),
            None => (github.create_hook(&repo.full_name, &spec).await?, "created"),
        };

        let registration = WebhookRegistration {
            project_id: project_id.to_string(),
            repo_id: repo.id.to_string(),
            webhook_id: hook.id,
            webhook_url: self.webhook_url.clone(),
            events: events.clone(),
            active,
            created_at: Utc::now().to_rfc3339(),
        };
        cache::put_json(
            self.cache.as_ref(),
            &format!("{}{}", WEBHOOK_CONFIG_PREFIX, project_id),
            WEBHOOK_CONFIG_TTL,
            &registration,
        )
        .await?;

        info!(repo = %repo.full_name, hook_id = hook.id, action = action, "webhook_installed");

        Ok(json!({
            "success": true,
            "action": action,
            "webhook": {
                "id": hook.id,
                "url": self.webhook_url,
                "events": events,
                "active": active,
            },
            "message": format!("Successfully {} webhook for {}", action, repo.full_name),
        }))
    }

    async fn analyze_pr_metrics(&self, args: MetricsArgs) -> Result<Value> {
        if args.timeframe_days == 0 {
            return Err(Error::InvalidArgument("timeframe_days must be at least 1".to_string()));
        }

        let repo = self.project_repository(&args.project_id).await?;
        let include = args
            .metrics
            .as_deref()
            .map(MetricsInclude::from_names)
            .unwrap_or_else(MetricsInclude::all);
        let stale_days = self.pr_configs.get(&repo.id.to_string()).await.close_stale_after_days;

        let end = Utc::now();
        let start = end - Duration::days(i64::from(args.timeframe_days));
        let metrics = analyze_repository(self.github()?, &repo.full_name, args.timeframe_days, include, stale_days).await?;
        let insights = generate_insights(&metrics);

        info!(repo = %repo.full_name, total_prs = metrics.total_prs, "pr_metrics_analyzed");

        Ok(json!({
            "success": true,
            "repository": repo.full_name,
            "metrics": metrics,
            "insights": insights,
            "timeframe": {
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
                "days": args.timeframe_days,
            },
        }))
    }

    // =========================================================================
    // Resources
    // =========================================================================

    async fn connected_repositories(&self) -> Value {
        match self.studio.list_projects().await {
            Ok(projects) => projects
                .into_iter()
                .filter(|p| p.github_repo_id.is_some())
                .map(|p| {
                    json!({
                        "project_id": p.id,
                        "repo_id": p.github_repo_id,
                        "repo_name": p.github_repo_name,
                        "owner": p.github_owner,
                        "connected_at": p.created_at,
                    })
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "connected_repositories_failed");
                json!([])
            }
        }
    }
}

fn text_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("N/A")
}

fn related_task_section(task_id: &str, task: &Value) -> String {
    format!(
        "\n\n## Related Task\n- **Task**: {} (`{}`)\n- **Type**: {}\n- **Priority**: {}\n- **Status**: {}\n",
        text_field(task, "title"),
        task_id,
        text_field(task, "type"),
        text_field(task, "priority"),
        text_field(task, "status"),
    )
}

fn agent_attribution(agent_id: &str, agent: &Value) -> String {
    let name = agent.get("name").and_then(|v| v.as_str()).unwrap_or(agent_id);
    let version = agent.get("version").and_then(|v| v.as_str()).unwrap_or("1.0");
    format!("\n\n---\n*Created by Studio agent **{}** (v{})*\n", name, version)
}

fn issue_templates() -> Value {
    json!([
        {
            "name": "bug",
            "title_prefix": "[Bug] ",
            "labels": ["bug"],
            "body": "## Description\n\n## Steps to Reproduce\n1. \n\n## Expected Behavior\n\n## Actual Behavior\n\n## Environment\n"
        },
        {
            "name": "feature",
            "title_prefix": "[Feature] ",
            "labels": ["enhancement"],
            "body": "## Summary\n\n## Motivation\n\n## Proposed Solution\n\n## Acceptance Criteria\n- [ ] \n"
        },
        {
            "name": "task",
            "title_prefix": "[Task] ",
            "labels": ["task"],
            "body": "## Goal\n\n## Details\n\n## Definition of Done\n- [ ] \n"
        }
    ])
}

fn pr_description_prompt(args: PrDescriptionArgs) -> String {
    let criteria = args
        .task_context
        .get("acceptanceCriteria")
        .cloned()
        .unwrap_or_else(|| json!([]));
    format!(
        "Generate a comprehensive pull request description based on the following information:\n\n\
         **Changes Made**:\n{}\n\n\
         **Task Context**:\n- Title: {}\n- Description: {}\n- Type: {}\n- Acceptance Criteria: {}\n\n\
         Please create a well-structured PR description that includes:\n\
         1. A clear summary of what changed and why\n\
         2. Technical details of the implementation\n\
         3. Testing performed\n\
         4. Any breaking changes or migration notes\n\
         5. Screenshots or examples if applicable\n\
         6. Related issues or tasks\n\n\
         Format the description using GitHub-flavored markdown.",
        args.changes,
        text_field(&args.task_context, "title"),
        text_field(&args.task_context, "description"),
        text_field(&args.task_context, "type"),
        serde_json::to_string_pretty(&criteria).unwrap_or_else(|_| "[]".to_string()),
    )
}

fn issue_triage_prompt(args: IssueTriageArgs) -> String {
    let topics: Vec<&str> = args
        .repository_context
        .get("topics")
        .and_then(|t| t.as_array())
        .map(|t| t.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    format!(
        "Analyze and triage this GitHub issue:\n\n\
         **Issue Content**:\n{}\n\n\
         **Repository Context**:\n- Name: {}\n- Description: {}\n- Topics: {}\n\n\
         Please provide:\n\
         1. Issue category (bug, feature, question, documentation, etc.)\n\
         2. Priority level (low, medium, high, urgent)\n\
         3. Suggested labels\n\
         4. Estimated complexity\n\
         5. Recommended next steps",
        args.issue_body,
        text_field(&args.repository_context, "name"),
        text_field(&args.repository_context, "description"),
        topics.join(", "),
    )
}

fn code_review_prompt(args: CodeReviewArgs) -> String {
    format!(
        "Review this code diff and provide feedback:\n\n\
         **Pull Request Context**:\n- Title: {}\n- Description: {}\n\n\
         **Code Diff**:\n```diff\n{}\n```\n\n\
         Please provide:\n\
         1. Overall assessment\n\
         2. Code quality feedback\n\
         3. Potential issues or bugs\n\
         4. Performance considerations\n\
         5. Security concerns\n\
         6. Suggestions for improvement\n\
         7. Specific line-by-line comments if needed",
        text_field(&args.pr_context, "title"),
        text_field(&args.pr_context, "body"),
        args.diff,
    )
}

#[async_trait]
impl McpServer for GitHubServer {
    fn name(&self) -> &str {
        "github"
    }

    fn resources(&self) -> Vec<Resource> {
        GitHubResource::ALL.iter().map(GitHubResource::describe).collect()
    }

    fn tools(&self) -> Vec<Tool> {
        GitHubTool::ALL.iter().map(GitHubTool::describe).collect()
    }

    fn prompts(&self) -> Vec<Prompt> {
        GitHubPrompt::ALL.iter().map(GitHubPrompt::describe).collect()
    }

    async fn read_resource(&self, uri: &str) -> Result<Value> {
        let resource = GitHubResource::parse(uri).ok_or_else(|| Error::NotFound(format!("Resource '{}'", uri)))?;
        match resource {
            GitHubResource::Repositories => resource_contents(uri, &self.connected_repositories().await),
            GitHubResource::Webhooks => {
                let hooks: Vec<WebhookRegistration> =
                    cache::scan_json(self.cache.as_ref(), WEBHOOK_CONFIG_PREFIX).await?;
                resource_contents(uri, &hooks)
            }
            GitHubResource::PrAutomation => {
                let configs: BTreeMap<String, PrAutomationConfig> = self.pr_configs.all().await.into_iter().collect();
                resource_contents(uri, &configs)
            }
            GitHubResource::AgentMappings => {
                let mappings: BTreeMap<String, AgentAssignment> = self
                    .agents
                    .all()
                    .await
                    .into_iter()
                    .map(|a| (a.agent_id.clone(), a))
                    .collect();
                resource_contents(uri, &mappings)
            }
            GitHubResource::IssueTemplates => resource_contents(uri, &issue_templates()),
        }
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        let tool = GitHubTool::parse(name).ok_or_else(|| Error::NotFound(format!("Tool '{}'", name)))?;
        match self.run_tool(tool, args).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(tool = tool.name(), error = %e, "github_tool_failed");
                Ok(tool_failure(e))
            }
        }
    }

    async fn get_prompt(&self, name: &str, args: Value) -> Result<Value> {
        let prompt = GitHubPrompt::parse(name).ok_or_else(|| Error::NotFound(format!("Prompt '{}'", name)))?;
        let text = match prompt {
            GitHubPrompt::PrDescription => pr_description_prompt(arguments(args)?),
            GitHubPrompt::IssueTriage => issue_triage_prompt(arguments(args)?),
            GitHubPrompt::CodeReview => code_review_prompt(arguments(args)?),
        };
        Ok(prompt_messages(text))
    }
}

/// MCP routes plus `POST /webhooks/github`.
pub fn router(server: Arc<GitHubServer>) -> Router {
    let webhooks = web::router(server.webhook_state());
    mcp::router(server).merge(webhooks)
}
