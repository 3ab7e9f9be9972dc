//! GitHub webhook event classification and dispatch.
//!
//! ## Processing Flow
//!
//! ```text
//! WebhookDelivery → Dispatcher::process() → handler → Studio notification
//!                        │                     │
//!                        └ webhook:<id>        └ webhook:error:<id> on failure
//! ```
//!
//! Deliveries are processed independently. Two deliveries touching the same
//! pull request may run concurrently and their side effects can interleave.

mod handlers;
pub mod payloads;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::automation::{AgentRegistry, PrConfigStore};
use crate::cache::{self, Cache, WEBHOOK_ERROR_TTL, WEBHOOK_EVENT_TTL};
use crate::github::GitHubClient;
use crate::studio::{RepoConnection, StudioClient, REPO_CONFIG_PREFIX};
use crate::Result;

/// GitHub event tags the integration recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEvent {
    Push,
    PullRequest,
    Issues,
    IssueComment,
    PullRequestReview,
    PullRequestReviewComment,
    WorkflowRun,
    CheckRun,
    CheckSuite,
    Release,
    Deployment,
    DeploymentStatus,
}

impl WebhookEvent {
    pub const ALL: [WebhookEvent; 12] = [
        WebhookEvent::Push,
        WebhookEvent::PullRequest,
        WebhookEvent::Issues,
        WebhookEvent::IssueComment,
        WebhookEvent::PullRequestReview,
        WebhookEvent::PullRequestReviewComment,
        WebhookEvent::WorkflowRun,
        WebhookEvent::CheckRun,
        WebhookEvent::CheckSuite,
        WebhookEvent::Release,
        WebhookEvent::Deployment,
        WebhookEvent::DeploymentStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Push => "push",
            WebhookEvent::PullRequest => "pull_request",
            WebhookEvent::Issues => "issues",
            WebhookEvent::IssueComment => "issue_comment",
            WebhookEvent::PullRequestReview => "pull_request_review",
            WebhookEvent::PullRequestReviewComment => "pull_request_review_comment",
            WebhookEvent::WorkflowRun => "workflow_run",
            WebhookEvent::CheckRun => "check_run",
            WebhookEvent::CheckSuite => "check_suite",
            WebhookEvent::Release => "release",
            WebhookEvent::Deployment => "deployment",
            WebhookEvent::DeploymentStatus => "deployment_status",
        }
    }

    /// Events subscribed to when a repository hook is set up without an
    /// explicit list.
    pub fn default_subscriptions() -> Vec<String> {
        [
            WebhookEvent::Push,
            WebhookEvent::PullRequest,
            WebhookEvent::Issues,
            WebhookEvent::IssueComment,
            WebhookEvent::PullRequestReview,
            WebhookEvent::WorkflowRun,
        ]
        .iter()
        .map(|e| e.as_str().to_string())
        .collect()
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an event tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl FromStr for WebhookEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        WebhookEvent::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// One received webhook request, after signature verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    #[serde(rename = "event_type")]
    pub event: String,
    pub payload: Value,
    #[serde(rename = "timestamp")]
    pub received_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(delivery_id: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            event: event.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    fn repository_id(&self) -> Option<u64> {
        self.payload.get("repository")?.get("id")?.as_u64()
    }
}

/// Routes deliveries to event handlers.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct Dispatcher {
    github: Option<GitHubClient>,
    studio: StudioClient,
    cache: Arc<dyn Cache>,
    pr_configs: Arc<PrConfigStore>,
    agents: Arc<AgentRegistry>,
    store_events: bool,
}

impl Dispatcher {
    pub fn new(
        github: Option<GitHubClient>,
        studio: StudioClient,
        cache: Arc<dyn Cache>,
        pr_configs: Arc<PrConfigStore>,
        agents: Arc<AgentRegistry>,
        store_events: bool,
    ) -> Self {
        Self {
            github,
            studio,
            cache,
            pr_configs,
            agents,
            store_events,
        }
    }

    /// Process one delivery to completion. Never fails; errors are logged and
    /// recorded in the cache.
    pub async fn process(&self, delivery: WebhookDelivery) {
        info!(
            delivery_id = %delivery.delivery_id,
            event = %delivery.event,
            "webhook_processing"
        );

        if self.store_events {
            let key = format!("webhook:{}", delivery.delivery_id);
            if let Err(e) = cache::put_json(self.cache.as_ref(), &key, WEBHOOK_EVENT_TTL, &delivery).await {
                warn!(delivery_id = %delivery.delivery_id, error = %e, "webhook_store_failed");
            }
        }

        match self.dispatch(&delivery).await {
            Ok(()) => {
                self.notify_studio(&delivery).await;
                info!(delivery_id = %delivery.delivery_id, "webhook_processed");
            }
            Err(e) => {
                error!(
                    delivery_id = %delivery.delivery_id,
                    event = %delivery.event,
                    error = %e,
                    "webhook_handler_failed"
                );
                self.store_error(&delivery, &e.to_string()).await;
            }
        }
    }

    async fn dispatch(&self, delivery: &WebhookDelivery) -> Result<()> {
        let event = match delivery.event.parse::<WebhookEvent>() {
            Ok(event) => event,
            Err(UnknownEvent(tag)) => {
                warn!(delivery_id = %delivery.delivery_id, event = %tag, "webhook_event_unknown");
                return Ok(());
            }
        };

        let payload = &delivery.payload;
        match event {
            WebhookEvent::Push => self.handle_push(payload).await,
            WebhookEvent::PullRequest => self.handle_pull_request(payload).await,
            WebhookEvent::Issues => self.handle_issues(payload).await,
            WebhookEvent::IssueComment => self.handle_issue_comment(payload).await,
            WebhookEvent::PullRequestReview => self.handle_review(payload).await,
            WebhookEvent::WorkflowRun => self.handle_workflow_run(payload).await,
            WebhookEvent::PullRequestReviewComment
            | WebhookEvent::CheckRun
            | WebhookEvent::CheckSuite
            | WebhookEvent::Release
            | WebhookEvent::Deployment
            | WebhookEvent::DeploymentStatus => {
                debug!(delivery_id = %delivery.delivery_id, event = %event, "webhook_event_unhandled");
                Ok(())
            }
        }
    }

    async fn store_error(&self, delivery: &WebhookDelivery, message: &str) {
        let key = format!("webhook:error:{}", delivery.delivery_id);
        let record = json!({
            "delivery_id": delivery.delivery_id,
            "event_type": delivery.event,
            "error": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = cache::put_json(self.cache.as_ref(), &key, WEBHOOK_ERROR_TTL, &record).await {
            warn!(delivery_id = %delivery.delivery_id, error = %e, "webhook_error_store_failed");
        }
    }

    async fn notify_studio(&self, delivery: &WebhookDelivery) {
        let Some(repo_id) = delivery.repository_id() else {
            return;
        };
        let Some(connection) = self.connection_for_repo(repo_id).await else {
            debug!(repo_id = repo_id, "webhook_repo_not_connected");
            return;
        };

        if let Err(e) = self
            .studio
            .post_github_event(&connection.project_id, &delivery.event, &delivery.payload)
            .await
        {
            warn!(
                delivery_id = %delivery.delivery_id,
                project_id = %connection.project_id,
                error = %e,
                "studio_notify_failed"
            );
        }
    }

    /// Studio project connected to a GitHub repository id.
    pub async fn connection_for_repo(&self, repo_id: u64) -> Option<RepoConnection> {
        let wanted = repo_id.to_string();
        match cache::scan_json::<RepoConnection>(self.cache.as_ref(), REPO_CONFIG_PREFIX).await {
            Ok(connections) => connections.into_iter().find(|c| c.repo_id == wanted),
            Err(e) => {
                warn!(repo_id = repo_id, error = %e, "repo_connection_lookup_failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{AgentAssignment, PrAutomationConfig};
    use crate::cache::MemoryCache;
    use crate::config::AutomationDefaults;
    use crate::github::DEFAULT_API_VERSION;
    use httpmock::prelude::*;
    use std::time::Duration;

    struct Harness {
        dispatcher: Dispatcher,
        cache: Arc<MemoryCache>,
        agents: Arc<AgentRegistry>,
    }

    /// Dispatcher whose GitHub and Studio clients both point at `server`.
    fn harness(server: &MockServer) -> Harness {
        let cache = Arc::new(MemoryCache::new());
        let agents = Arc::new(AgentRegistry::new());
        let github = GitHubClient::with_base_url(server.base_url(), DEFAULT_API_VERSION, "t").unwrap();
        let studio = StudioClient::new(server.base_url(), None, Duration::from_secs(5)).unwrap();
        let pr_configs = Arc::new(PrConfigStore::new(
            cache.clone(),
            PrAutomationConfig::from(&AutomationDefaults::default()),
        ));
        let dispatcher = Dispatcher::new(Some(github), studio, cache.clone(), pr_configs, agents.clone(), true);
        Harness { dispatcher, cache, agents }
    }

    async fn connect(cache: &MemoryCache, project_id: &str, repo_id: u64) {
        let connection = RepoConnection {
            project_id: project_id.to_string(),
            repo_id: repo_id.to_string(),
            repo_name: "widgets".to_string(),
            full_name: "octo/widgets".to_string(),
            owner: "octo".to_string(),
            default_branch: "main".to_string(),
            private: false,
            connected_at: "2024-01-01T00:00:00Z".to_string(),
        };
        cache::put_json(cache, &format!("repo:config:{}", project_id), cache::REPO_CONFIG_TTL, &connection)
            .await
            .unwrap();
    }

    fn repository() -> Value {
        json!({"id": 42, "name": "widgets", "full_name": "octo/widgets", "owner": {"login": "octo"}})
    }

    fn agent(id: &str, name: &str, agent_type: &str, username: Option<&str>) -> AgentAssignment {
        AgentAssignment {
            agent_id: id.to_string(),
            agent_name: name.to_string(),
            agent_type: agent_type.to_string(),
            capabilities: vec![],
            github_username: username.map(str::to_string),
            github_label: None,
        }
    }

    fn pull_request(number: u64, author: &str, body: &str) -> Value {
        json!({
            "id": 700 + number, "number": number, "node_id": "PR_node", "title": "Add retries",
            "body": body, "state": "open", "draft": false,
            "user": {"login": author}, "base": {"ref": "feature/x"}
        })
    }

    #[test]
    fn test_event_tags_round_trip() {
        for event in WebhookEvent::ALL {
            assert_eq!(event.as_str().parse::<WebhookEvent>(), Ok(event));
        }
        assert_eq!("star".parse::<WebhookEvent>(), Err(UnknownEvent("star".to_string())));
        assert!("".parse::<WebhookEvent>().is_err());
    }

    #[tokio::test]
    async fn test_unknown_event_makes_no_remote_calls() {
        let server = MockServer::start_async().await;
        let posts = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({}));
            })
            .await;
        let gets = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).json_body(json!([]));
            })
            .await;

        let h = harness(&server);
        h.dispatcher
            .process(WebhookDelivery::new("d-1", "star", json!({"action": "created"})))
            .await;

        posts.assert_calls_async(0).await;
        gets.assert_calls_async(0).await;
        assert!(h.cache.get("webhook:d-1").await.unwrap().is_some());
        assert!(h.cache.get("webhook:error:d-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_records_error() {
        let server = MockServer::start_async().await;
        let h = harness(&server);

        h.dispatcher
            .process(WebhookDelivery::new("d-2", "pull_request", json!({"action": "opened"})))
            .await;

        let record: Value = cache::get_json(h.cache.as_ref(), "webhook:error:d-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["event_type"], "pull_request");
        assert!(record["error"].as_str().unwrap().contains("Invalid payload"));
    }

    #[tokio::test]
    async fn test_push_comments_and_closes_issues() {
        let server = MockServer::start_async().await;
        let comment = server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/octo/widgets/issues/12/comments");
                then.status(201).json_body(json!({"id": 1}));
            })
            .await;
        let close = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/repos/octo/widgets/issues/12")
                    .json_body(json!({"state": "closed"}));
                then.status(200).json_body(json!({"number": 12, "state": "closed"}));
            })
            .await;

        let h = harness(&server);
        let payload = json!({
            "ref": "refs/heads/main",
            "repository": repository(),
            "commits": [{"id": "abcdef0123456", "message": "Tidy parser\n\nFixes #12", "url": "https://example.test/c"}]
        });
        h.dispatcher.process(WebhookDelivery::new("d-3", "push", payload)).await;

        comment.assert_async().await;
        close.assert_async().await;
    }

    #[tokio::test]
    async fn test_issue_opened_triages_and_creates_task() {
        let server = MockServer::start_async().await;
        let labels = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/5/labels")
                    .json_body(json!({"labels": ["bug"]}));
                then.status(200).json_body(json!([{"name": "bug"}]));
            })
            .await;
        let task = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/tasks")
                    .body_includes(r#""projectId":"p1""#)
                    .body_includes(r#""priority":"HIGH""#)
                    .body_includes(r#""githubIssueNumber":5"#);
                then.status(201).json_body(json!({"id": "t1"}));
            })
            .await;
        let suggestion = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/5/comments")
                    .body_includes("Backend Bot");
                then.status(201).json_body(json!({"id": 2}));
            })
            .await;
        let notify = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/projects/p1/github-events")
                    .body_includes(r#""event_type":"issues""#);
                then.status(200).json_body(json!({}));
            })
            .await;

        let h = harness(&server);
        connect(&h.cache, "p1", 42).await;
        h.agents
            .register(AgentAssignment {
                agent_id: "a1".to_string(),
                agent_name: "Backend Bot".to_string(),
                agent_type: "BACKEND".to_string(),
                capabilities: vec![],
                github_username: None,
                github_label: None,
            })
            .await;

        let payload = json!({
            "action": "opened",
            "repository": repository(),
            "issue": {"id": 900, "number": 5, "title": "Crash when saving", "body": "stack trace attached"}
        });
        h.dispatcher.process(WebhookDelivery::new("d-4", "issues", payload)).await;

        labels.assert_async().await;
        task.assert_async().await;
        suggestion.assert_async().await;
        notify.assert_async().await;
    }

    #[tokio::test]
    async fn test_wip_pull_request_converted_to_draft() {
        let server = MockServer::start_async().await;
        let graphql = server
            .mock_async(|when, then| {
                when.method(POST).path("/graphql").body_includes("PR_node");
                then.status(200).json_body(json!({"data": {}}));
            })
            .await;
        let files = server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/widgets/pulls/8/files");
                then.status(200).json_body(json!([{"filename": "src/lib.rs"}]));
            })
            .await;
        let labels = server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/octo/widgets/issues/8/labels");
                then.status(200).json_body(json!([]));
            })
            .await;

        let h = harness(&server);
        let payload = json!({
            "action": "opened",
            "repository": repository(),
            "pull_request": {
                "id": 77, "number": 8, "node_id": "PR_node", "title": "[WIP] new cache",
                "state": "open", "draft": false, "additions": 3, "deletions": 1,
                "user": {"login": "octo"}, "base": {"ref": "feature/x"}
            }
        });
        h.dispatcher.process(WebhookDelivery::new("d-5", "pull_request", payload)).await;

        graphql.assert_async().await;
        files.assert_async().await;
        // size/XS and backend in one request; no review-needed for feature/x.
        labels.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_pull_request_agent_marker_updates_pr_task() {
        let server = MockServer::start_async().await;
        let pr_lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/tasks")
                    .query_param("projectId", "p1")
                    .query_param("githubPrNumber", "9");
                then.status(200).json_body(json!([{"id": "t9"}]));
            })
            .await;
        let issue_lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tasks").query_param("githubIssueNumber", "9");
                then.status(200).json_body(json!([{"id": "wrong"}]));
            })
            .await;
        let patch = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/api/tasks/t9")
                    .json_body(json!({"agentId": "a9"}));
                then.status(200).json_body(json!({"id": "t9"}));
            })
            .await;
        let created = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/tasks").body_includes(r#""githubPrNumber":9"#);
                then.status(201).json_body(json!({"id": "t9"}));
            })
            .await;

        let h = harness(&server);
        connect(&h.cache, "p1", 42).await;
        h.agents.register(agent("a9", "bot", "GENERAL", None)).await;

        let payload = json!({
            "action": "opened",
            "repository": repository(),
            "pull_request": pull_request(9, "octo", "Retry flaky calls.\n\nagent: bot")
        });
        h.dispatcher.process(WebhookDelivery::new("d-6", "pull_request", payload)).await;

        created.assert_async().await;
        pr_lookup.assert_async().await;
        patch.assert_async().await;
        issue_lookup.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_agent_marker_on_pull_request_comment_uses_pr_number() {
        let server = MockServer::start_async().await;
        let pr_lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tasks").query_param("githubPrNumber", "9");
                then.status(200).json_body(json!([{"id": "t9"}]));
            })
            .await;
        let patch = server
            .mock_async(|when, then| {
                when.method(PATCH).path("/api/tasks/t9").body_includes(r#""agentId":"a9""#);
                then.status(200).json_body(json!({"id": "t9"}));
            })
            .await;

        let h = harness(&server);
        connect(&h.cache, "p1", 42).await;
        h.agents.register(agent("a9", "bot", "GENERAL", None)).await;

        let payload = json!({
            "action": "created",
            "repository": repository(),
            "issue": {
                "id": 709, "number": 9, "title": "Add retries",
                "pull_request": {"url": "https://api.github.com/repos/octo/widgets/pulls/9"}
            },
            "comment": {"id": 1, "body": "agent: bot", "user": {"login": "octo"}}
        });
        h.dispatcher.process(WebhookDelivery::new("d-7", "issue_comment", payload)).await;

        pr_lookup.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_issue_comment_assigns_agent() {
        let server = MockServer::start_async().await;
        let comment = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/5/comments")
                    .body_includes("**Agent Assigned**: Builder");
                then.status(201).json_body(json!({"id": 3}));
            })
            .await;
        let assignee = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/5/assignees")
                    .json_body(json!({"assignees": ["builder-bot"]}));
                then.status(201).json_body(json!({"number": 5}));
            })
            .await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/tasks")
                    .query_param("projectId", "p1")
                    .query_param("githubIssueNumber", "5");
                then.status(200).json_body(json!([{"id": "t5"}]));
            })
            .await;
        let patch = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/api/tasks/t5")
                    .json_body(json!({"agentId": "a1"}));
                then.status(200).json_body(json!({"id": "t5"}));
            })
            .await;

        let h = harness(&server);
        connect(&h.cache, "p1", 42).await;
        h.agents
            .register(agent("a1", "Builder", "BACKEND", Some("builder-bot")))
            .await;

        let comment_on = |action: &str| {
            json!({
                "action": action,
                "repository": repository(),
                "issue": {"id": 900, "number": 5, "title": "Crash when saving"},
                "comment": {"id": 2, "body": "Taking a look.\nagent: @builder", "user": {"login": "octo"}}
            })
        };
        h.dispatcher
            .process(WebhookDelivery::new("d-8", "issue_comment", comment_on("edited")))
            .await;
        comment.assert_calls_async(0).await;

        h.dispatcher
            .process(WebhookDelivery::new("d-9", "issue_comment", comment_on("created")))
            .await;
        comment.assert_async().await;
        assignee.assert_async().await;
        lookup.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_ready_for_review_requests_reviewers() {
        let server = MockServer::start_async().await;
        let reviewers = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/pulls/8/requested_reviewers")
                    .json_body(json!({"reviewers": ["alice", "bob"], "team_reviewers": []}));
                then.status(201).json_body(json!({"number": 8}));
            })
            .await;
        let labels = server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/octo/widgets/issues/8/labels");
                then.status(200).json_body(json!([]));
            })
            .await;

        let h = harness(&server);
        h.agents.register(agent("a1", "Alice", "BACKEND", Some("alice"))).await;
        h.agents.register(agent("a2", "Bob", "FRONTEND", Some("bob"))).await;

        let payload = json!({
            "action": "ready_for_review",
            "repository": repository(),
            "pull_request": pull_request(8, "carol", "")
        });
        h.dispatcher.process(WebhookDelivery::new("d-11", "pull_request", payload)).await;

        reviewers.assert_async().await;
        labels.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_opened_reviewers_capped_and_exclude_author() {
        let server = MockServer::start_async().await;
        let reviewers = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/pulls/8/requested_reviewers")
                    .json_body(json!({"reviewers": ["alice", "carol"], "team_reviewers": []}));
                then.status(201).json_body(json!({"number": 8}));
            })
            .await;

        let h = harness(&server);
        let config = PrAutomationConfig {
            auto_label: false,
            require_reviews: 2,
            ..PrAutomationConfig::from(&AutomationDefaults::default())
        };
        h.dispatcher.pr_configs.put("42", config).await.unwrap();
        for (id, username) in [("a1", "dave"), ("a2", "bob"), ("a3", "carol"), ("a4", "alice")] {
            h.agents.register(agent(id, id, "GENERAL", Some(username))).await;
        }

        let payload = json!({
            "action": "opened",
            "repository": repository(),
            "pull_request": pull_request(8, "Bob", "")
        });
        h.dispatcher.process(WebhookDelivery::new("d-12", "pull_request", payload)).await;

        reviewers.assert_async().await;
    }

    #[tokio::test]
    async fn test_merged_pull_request_completes_linked_tasks() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/tasks")
                    .query_param("projectId", "p1")
                    .query_param("githubPrNumber", "8");
                then.status(200).json_body(json!([{"id": "t1"}, {"id": 2}]));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/api/tasks/t1")
                    .json_body(json!({"status": "COMPLETED"}));
                then.status(200).json_body(json!({"id": "t1"}));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/api/tasks/2")
                    .json_body(json!({"status": "COMPLETED"}));
                then.status(204);
            })
            .await;

        let h = harness(&server);
        connect(&h.cache, "p1", 42).await;

        let closed = |merged: bool| {
            let mut pr = pull_request(8, "octo", "");
            pr["state"] = json!("closed");
            pr["merged"] = json!(merged);
            json!({"action": "closed", "repository": repository(), "pull_request": pr})
        };
        h.dispatcher
            .process(WebhookDelivery::new("d-13", "pull_request", closed(false)))
            .await;
        lookup.assert_calls_async(0).await;

        h.dispatcher
            .process(WebhookDelivery::new("d-14", "pull_request", closed(true)))
            .await;
        lookup.assert_async().await;
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_issue_labeled_suggests_agent() {
        let server = MockServer::start_async().await;
        let suggestion = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/6/comments")
                    .body_includes("Suggested agent: **Pixel** (FRONTEND)")
                    .body_includes("agent: Pixel");
                then.status(201).json_body(json!({"id": 4}));
            })
            .await;

        let h = harness(&server);
        h.agents.register(agent("a2", "Pixel", "FRONTEND", None)).await;
        h.agents.register(agent("a1", "Backend Bot", "BACKEND", None)).await;

        let labeled = |label: &str| {
            json!({
                "action": "labeled",
                "repository": repository(),
                "issue": {"id": 901, "number": 6, "title": "Button misaligned"},
                "label": {"name": label}
            })
        };
        h.dispatcher.process(WebhookDelivery::new("d-15", "issues", labeled("UI"))).await;
        h.dispatcher
            .process(WebhookDelivery::new("d-16", "issues", labeled("wontfix")))
            .await;

        suggestion.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_workflow_failure_comments_on_pull_requests() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/3/comments")
                    .body_includes("Workflow **CI** finished with `failure` on `feature/x`")
                    .body_includes("[View run](https://github.com/octo/widgets/actions/runs/1)");
                then.status(201).json_body(json!({"id": 5}));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/4/comments")
                    .body_includes("Workflow **CI** finished with `failure`");
                then.status(201).json_body(json!({"id": 6}));
            })
            .await;

        let h = harness(&server);
        let run = |conclusion: &str| {
            json!({
                "action": "completed",
                "repository": repository(),
                "workflow_run": {
                    "name": "CI", "conclusion": conclusion, "head_branch": "feature/x",
                    "html_url": "https://github.com/octo/widgets/actions/runs/1",
                    "pull_requests": [{"number": 3}, {"number": 4}]
                }
            })
        };
        h.dispatcher
            .process(WebhookDelivery::new("d-17", "workflow_run", run("success")))
            .await;
        h.dispatcher
            .process(WebhookDelivery::new("d-18", "workflow_run", run("failure")))
            .await;

        first.assert_calls_async(1).await;
        second.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_connection_lookup_by_repo_id() {
        let server = MockServer::start_async().await;
        let h = harness(&server);
        connect(&h.cache, "p1", 42).await;
        connect(&h.cache, "p2", 43).await;

        assert_eq!(h.dispatcher.connection_for_repo(43).await.unwrap().project_id, "p2");
        assert!(h.dispatcher.connection_for_repo(44).await.is_none());
    }
}
