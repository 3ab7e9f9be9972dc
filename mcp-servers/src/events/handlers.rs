//! Per-event handlers.
//!
//! Every remote side effect is best effort: a failed GitHub or Studio call is
//! logged and the handler carries on with its remaining steps.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::payloads::{
    decode, IssueCommentEvent, IssuesEvent, PullRequestEvent, PushEvent, ReviewEvent,
    WorkflowRunEvent,
};
use super::Dispatcher;
use crate::automation::rules::{
    agent_type_for_label, extract_agent_marker, extract_closing_references,
    extract_issue_references, file_labels, has_closing_marker, is_wip_title, size_label,
    triage_issue,
};
use crate::automation::{AgentAssignment, PrAutomationConfig};
use crate::github::{GitHubClient, Issue, PullRequest, Repository};
use crate::Result;

const REVIEW_NEEDED_LABEL: &str = "review-needed";

/// What an `agent:` marker was found on. Studio links tasks to issues and
/// pull requests through different fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Thread {
    Issue,
    PullRequest,
}

impl Thread {
    fn task_field(&self) -> &'static str {
        match self {
            Thread::Issue => "githubIssueNumber",
            Thread::PullRequest => "githubPrNumber",
        }
    }
}

/// Log a failed side effect and drop the error.
fn best_effort<T>(result: Result<T>, action: &'static str, repo: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(repo = %repo, action = action, error = %e, "webhook_action_failed");
            None
        }
    }
}

impl Dispatcher {
    fn github_client(&self, repo: &str) -> Option<&GitHubClient> {
        if self.github.is_none() {
            debug!(repo = %repo, "github_client_unavailable");
        }
        self.github.as_ref()
    }

    async fn project_id_for(&self, repository: &Repository) -> Option<String> {
        self.connection_for_repo(repository.id)
            .await
            .map(|c| c.project_id)
    }

    // =========================================================================
    // push
    // =========================================================================

    pub(super) async fn handle_push(&self, payload: &Value) -> Result<()> {
        let event: PushEvent = decode("push", payload)?;
        let repo = &event.repository.full_name;

        info!(
            repo = %repo,
            git_ref = %event.ref_name,
            commits = event.commits.len(),
            "push_received"
        );

        let Some(github) = self.github_client(repo) else {
            return Ok(());
        };

        for commit in &event.commits {
            for number in extract_issue_references(&commit.message) {
                let body = format!(
                    "Referenced in commit [`{}`]({}): {}",
                    commit.short_sha(),
                    commit.url,
                    commit.summary()
                );
                best_effort(
                    github.create_comment(repo, number, &body).await,
                    "comment_referenced_issue",
                    repo,
                );
            }

            if has_closing_marker(&commit.message) {
                for number in extract_closing_references(&commit.message) {
                    if best_effort(github.close_issue(repo, number).await, "close_issue", repo).is_some() {
                        info!(repo = %repo, issue = number, sha = %commit.short_sha(), "issue_closed_by_commit");
                    }
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // pull_request
    // =========================================================================

    pub(super) async fn handle_pull_request(&self, payload: &Value) -> Result<()> {
        let event: PullRequestEvent = decode("pull_request", payload)?;
        let repository = &event.repository;
        let pr = &event.pull_request;

        info!(
            repo = %repository.full_name,
            number = pr.number,
            action = %event.action,
            "pull_request_received"
        );

        let config = self.pr_configs.get(&repository.id.to_string()).await;

        match event.action.as_str() {
            "opened" => self.pull_request_opened(repository, pr, &config).await,
            "ready_for_review" => {
                if config.auto_assign {
                    self.assign_reviewers(repository, pr, config.require_reviews).await;
                }
            }
            "closed" if pr.is_merged() => self.pull_request_merged(repository, pr).await,
            other => debug!(action = %other, number = pr.number, "pull_request_action_ignored"),
        }

        Ok(())
    }

    async fn pull_request_opened(&self, repository: &Repository, pr: &PullRequest, config: &PrAutomationConfig) {
        let repo = &repository.full_name;

        if config.draft_on_wip && !pr.draft && is_wip_title(&pr.title) {
            if let Some(github) = self.github_client(repo) {
                if best_effort(github.convert_to_draft(&pr.node_id).await, "convert_to_draft", repo).is_some() {
                    info!(repo = %repo, number = pr.number, "pull_request_converted_to_draft");
                }
            }
        }

        if config.auto_assign {
            self.assign_reviewers(repository, pr, config.require_reviews).await;
        }

        if config.auto_label {
            self.label_pull_request(repository, pr).await;
        }

        if let Some(base) = pr.base_branch() {
            if config.is_protected(base) {
                if let Some(github) = self.github_client(repo) {
                    best_effort(
                        github
                            .add_labels(repo, pr.number, &[REVIEW_NEEDED_LABEL.to_string()])
                            .await,
                        "label_protected_branch",
                        repo,
                    );
                }
            }
        }

        if let Some(project_id) = self.project_id_for(repository).await {
            let task = json!({
                "title": format!("Review PR: {}", pr.title),
                "description": pr.body.clone().unwrap_or_default(),
                "projectId": project_id,
                "type": "REVIEW",
                "status": "IN_PROGRESS",
                "priority": "MEDIUM",
                "githubPrId": pr.id,
                "githubPrNumber": pr.number,
            });
            best_effort(self.studio.create_task(&task).await, "create_pr_task", repo);
        }

        if let Some(name) = pr.body.as_deref().and_then(extract_agent_marker) {
            self.assign_agent(repository, Thread::PullRequest, pr.number, &name).await;
        }
    }

    async fn assign_reviewers(&self, repository: &Repository, pr: &PullRequest, wanted: u32) {
        let repo = &repository.full_name;
        let reviewers: Vec<String> = self
            .agents
            .reviewer_candidates(pr.author())
            .await
            .into_iter()
            .take(wanted as usize)
            .collect();

        if reviewers.is_empty() {
            debug!(repo = %repo, number = pr.number, "no_reviewer_candidates");
            return;
        }

        if let Some(github) = self.github_client(repo) {
            if best_effort(
                github.request_reviewers(repo, pr.number, &reviewers, &[]).await,
                "request_reviewers",
                repo,
            )
            .is_some()
            {
                info!(repo = %repo, number = pr.number, reviewers = ?reviewers, "reviewers_requested");
            }
        }
    }

    pub(crate) async fn label_pull_request(&self, repository: &Repository, pr: &PullRequest) {
        let repo = &repository.full_name;
        let Some(github) = self.github_client(repo) else {
            return;
        };

        let mut labels = Vec::new();
        if let (Some(additions), Some(deletions)) = (pr.additions, pr.deletions) {
            labels.push(size_label(additions, deletions).to_string());
        }
        if let Some(files) = best_effort(github.list_pull_files(repo, pr.number).await, "list_pull_files", repo) {
            let paths: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
            labels.extend(file_labels(&paths));
        }

        if labels.is_empty() {
            return;
        }
        if best_effort(github.add_labels(repo, pr.number, &labels).await, "label_pull_request", repo).is_some() {
            info!(repo = %repo, number = pr.number, labels = ?labels, "pull_request_labeled");
        }
    }

    async fn pull_request_merged(&self, repository: &Repository, pr: &PullRequest) {
        info!(repo = %repository.full_name, number = pr.number, "pull_request_merged");

        let Some(project_id) = self.project_id_for(repository).await else {
            return;
        };
        let query = [
            ("projectId", project_id),
            ("githubPrNumber", pr.number.to_string()),
        ];
        let Some(tasks) = best_effort(
            self.studio.find_tasks(&query).await,
            "find_pr_tasks",
            &repository.full_name,
        ) else {
            return;
        };

        for task_id in tasks.iter().filter_map(crate::studio::value_id) {
            best_effort(
                self.studio
                    .update_task(&task_id, &json!({ "status": "COMPLETED" }))
                    .await,
                "complete_pr_task",
                &repository.full_name,
            );
        }
    }

    // =========================================================================
    // issues
    // =========================================================================

    pub(super) async fn handle_issues(&self, payload: &Value) -> Result<()> {
        let event: IssuesEvent = decode("issues", payload)?;
        let repository = &event.repository;
        let issue = &event.issue;

        info!(
            repo = %repository.full_name,
            number = issue.number,
            action = %event.action,
            "issue_received"
        );

        match event.action.as_str() {
            "opened" => self.issue_opened(repository, issue).await,
            "labeled" => {
                if let Some(agent_type) = event.label.as_ref().and_then(|l| agent_type_for_label(&l.name)) {
                    self.suggest_agent(repository, issue.number, agent_type).await;
                }
            }
            other => debug!(action = %other, number = issue.number, "issue_action_ignored"),
        }

        Ok(())
    }

    async fn issue_opened(&self, repository: &Repository, issue: &Issue) {
        let repo = &repository.full_name;
        let triage = triage_issue(&issue.title, issue.body.as_deref().unwrap_or_default());
        debug!(repo = %repo, number = issue.number, priority = triage.priority, "issue_triaged");

        if !triage.labels.is_empty() {
            if let Some(github) = self.github_client(repo) {
                best_effort(
                    github.add_labels(repo, issue.number, &triage.labels).await,
                    "label_issue",
                    repo,
                );
            }
        }

        if let Some(project_id) = self.project_id_for(repository).await {
            let task = json!({
                "title": issue.title,
                "description": issue.body.clone().unwrap_or_default(),
                "projectId": project_id,
                "type": "FEATURE",
                "status": "PENDING",
                "priority": triage.priority.to_uppercase(),
                "githubIssueId": issue.id,
                "githubIssueNumber": issue.number,
            });
            best_effort(self.studio.create_task(&task).await, "create_issue_task", repo);
        }

        if let Some(agent_type) = triage.suggested_agent_type {
            self.suggest_agent(repository, issue.number, agent_type).await;
        }
    }

    async fn suggest_agent(&self, repository: &Repository, number: u64, agent_type: &str) {
        let repo = &repository.full_name;
        let Some(agent) = self.agents.by_type(agent_type).await.into_iter().next() else {
            debug!(repo = %repo, agent_type = %agent_type, "no_agent_for_type");
            return;
        };

        if let Some(github) = self.github_client(repo) {
            let body = format!(
                "Suggested agent: **{}** ({}). Comment `agent: {}` to assign it.",
                agent.agent_name, agent.agent_type, agent.agent_name
            );
            best_effort(github.create_comment(repo, number, &body).await, "suggest_agent", repo);
        }
    }

    // =========================================================================
    // issue_comment
    // =========================================================================

    pub(super) async fn handle_issue_comment(&self, payload: &Value) -> Result<()> {
        let event: IssueCommentEvent = decode("issue_comment", payload)?;
        let repository = &event.repository;

        debug!(
            repo = %repository.full_name,
            number = event.issue.number,
            comment_id = event.comment.id,
            action = %event.action,
            "issue_comment_received"
        );

        if event.action == "created" {
            if let Some(name) = extract_agent_marker(&event.comment.body) {
                let thread = if event.issue.is_pull_request() {
                    Thread::PullRequest
                } else {
                    Thread::Issue
                };
                self.assign_agent(repository, thread, event.issue.number, &name).await;
            }
        }

        Ok(())
    }

    /// Assign a registered agent to an issue or PR by name.
    async fn assign_agent(&self, repository: &Repository, thread: Thread, number: u64, name: &str) {
        let repo = &repository.full_name;
        let Some(agent) = self.agents.find(name).await else {
            warn!(repo = %repo, number = number, agent = %name, "agent_not_found");
            return;
        };

        if let Some(github) = self.github_client(repo) {
            self.decorate_assignment(github, repo, number, &agent).await;
        }

        if let Some(project_id) = self.project_id_for(repository).await {
            let query = [
                ("projectId", project_id),
                (thread.task_field(), number.to_string()),
            ];
            if let Some(tasks) = best_effort(self.studio.find_tasks(&query).await, "find_agent_task", repo) {
                if let Some(task_id) = tasks.first().and_then(crate::studio::value_id) {
                    best_effort(
                        self.studio
                            .update_task(&task_id, &json!({ "agentId": agent.agent_id }))
                            .await,
                        "assign_task_agent",
                        repo,
                    );
                }
            }
        }

        info!(repo = %repo, number = number, agent_id = %agent.agent_id, "agent_assigned");
    }

    async fn decorate_assignment(&self, github: &GitHubClient, repo: &str, number: u64, agent: &AgentAssignment) {
        best_effort(
            github.create_comment(repo, number, &agent.assignment_comment()).await,
            "comment_agent_assignment",
            repo,
        );
        if let Some(username) = &agent.github_username {
            best_effort(
                github.add_assignees(repo, number, &[username.clone()]).await,
                "assign_agent_user",
                repo,
            );
        }
        if let Some(label) = &agent.github_label {
            best_effort(
                github.add_labels(repo, number, &[label.clone()]).await,
                "label_agent",
                repo,
            );
        }
    }

    // =========================================================================
    // pull_request_review
    // =========================================================================

    pub(super) async fn handle_review(&self, payload: &Value) -> Result<()> {
        let event: ReviewEvent = decode("pull_request_review", payload)?;

        if event.action == "submitted" {
            info!(
                repo = %event.repository.full_name,
                number = event.pull_request.number,
                reviewer = %event.review.user.as_ref().map(|u| u.login.as_str()).unwrap_or("unknown"),
                state = %event.review.state,
                "pull_request_review_submitted"
            );
        }

        Ok(())
    }

    // =========================================================================
    // workflow_run
    // =========================================================================

    pub(super) async fn handle_workflow_run(&self, payload: &Value) -> Result<()> {
        let event: WorkflowRunEvent = decode("workflow_run", payload)?;
        let run = &event.workflow_run;
        let repo = &event.repository.full_name;

        if event.action != "completed" || !run.failed() {
            debug!(repo = %repo, workflow = %run.name, action = %event.action, "workflow_run_ignored");
            return Ok(());
        }

        warn!(
            repo = %repo,
            workflow = %run.name,
            conclusion = ?run.conclusion,
            pull_requests = run.pull_requests.len(),
            "workflow_run_failed"
        );

        let Some(github) = self.github_client(repo) else {
            return Ok(());
        };
        let body = format!(
            "Workflow **{}** finished with `{}` on `{}`. [View run]({})",
            run.name,
            run.conclusion.as_deref().unwrap_or("failure"),
            run.head_branch.as_deref().unwrap_or("unknown"),
            run.html_url
        );
        for pr in &run.pull_requests {
            best_effort(
                github.create_comment(repo, pr.number, &body).await,
                "comment_workflow_failure",
                repo,
            );
        }

        Ok(())
    }
}
