//! Studio backend REST client (projects, tasks, agents).
//!
//! Task and agent records are owned by the backend and passed through as
//! JSON; only the project fields the GitHub integration reads are typed.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{Error, Result};

/// Studio project as returned by `GET /api/projects/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Stored as a string by the backend; some deployments send a number.
    #[serde(default, deserialize_with = "string_or_number")]
    pub github_repo_id: Option<String>,
    #[serde(default)]
    pub github_repo_name: Option<String>,
    #[serde(default)]
    pub github_owner: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Project {
    /// Numeric GitHub repository id, when the project is connected.
    pub fn repo_id(&self) -> Option<u64> {
        self.github_repo_id.as_deref().and_then(|id| id.parse().ok())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A GitHub repository connected to a Studio project, cached under
/// `repo:config:<project_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoConnection {
    pub project_id: String,
    pub repo_id: String,
    pub repo_name: String,
    pub full_name: String,
    pub owner: String,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    pub connected_at: String,
}

pub const REPO_CONFIG_PREFIX: &str = "repo:config:";

/// Authenticated Studio API client.
#[derive(Clone)]
pub struct StudioClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl StudioClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("studio-mcp")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_response(status, body));
        }

        Ok(response)
    }

    async fn get_value(&self, path: &str) -> Result<Value> {
        debug!(path = %path, "studio_get");
        Ok(self.send(self.request(Method::GET, path)).await?.json().await?)
    }

    async fn send_value(&self, method: Method, path: &str, body: &Value) -> Result<Value> {
        debug!(method = %method, path = %path, "studio_write");
        let response = self.send(self.request(method, path).json(body)).await?;
        // Some endpoints answer 204 or an empty body.
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let value = self.get_value(&format!("/api/projects/{}", project_id)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let value = self.get_value("/api/projects").await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn update_project(&self, project_id: &str, patch: &Value) -> Result<Value> {
        self.send_value(Method::PATCH, &format!("/api/projects/{}", project_id), patch)
            .await
    }

    /// Forward a GitHub event to the project's event feed.
    pub async fn post_github_event(&self, project_id: &str, event_type: &str, payload: &Value) -> Result<()> {
        let body = json!({
            "event_type": event_type,
            "payload": payload,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.send_value(
            Method::POST,
            &format!("/api/projects/{}/github-events", project_id),
            &body,
        )
        .await?;
        Ok(())
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub async fn get_task(&self, task_id: &str) -> Result<Value> {
        self.get_value(&format!("/api/tasks/{}", task_id)).await
    }

    /// Find tasks matching query parameters, e.g. `[("projectId", "p1")]`.
    pub async fn find_tasks(&self, query: &[(&str, String)]) -> Result<Vec<Value>> {
        debug!(?query, "studio_find_tasks");
        let response = self
            .send(self.request(Method::GET, "/api/tasks").query(query))
            .await?;
        let value: Value = response.json().await?;
        Ok(match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        })
    }

    /// Create a task and return its id when the backend reports one.
    pub async fn create_task(&self, task: &Value) -> Result<Option<String>> {
        let created = self.send_value(Method::POST, "/api/tasks", task).await?;
        Ok(value_id(&created))
    }

    pub async fn update_task(&self, task_id: &str, patch: &Value) -> Result<Value> {
        self.send_value(Method::PATCH, &format!("/api/tasks/{}", task_id), patch)
            .await
    }

    // =========================================================================
    // Agents
    // =========================================================================

    pub async fn get_agent(&self, agent_id: &str) -> Result<Value> {
        self.get_value(&format!("/api/agents/{}", agent_id)).await
    }
}

/// Read an `id` field that may be a string or a number.
pub fn value_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn create_test_client(server: &MockServer) -> StudioClient {
        StudioClient::new(server.base_url(), Some("studio-key".to_string()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_project_repo_id_accepts_numbers() {
        let project: Project = serde_json::from_value(json!({
            "id": "p1",
            "githubRepoId": 123
        }))
        .unwrap();
        assert_eq!(project.repo_id(), Some(123));

        let project: Project = serde_json::from_value(json!({"id": "p2", "githubRepoId": ""})).unwrap();
        assert_eq!(project.repo_id(), None);
    }

    #[test]
    fn test_value_id() {
        assert_eq!(value_id(&json!({"id": "t1"})), Some("t1".to_string()));
        assert_eq!(value_id(&json!({"id": 7})), Some("7".to_string()));
        assert_eq!(value_id(&json!({})), None);
    }

    #[tokio::test]
    async fn test_get_project() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/projects/p1")
                    .header("Authorization", "Bearer studio-key");
                then.status(200).json_body(json!({
                    "id": "p1",
                    "githubRepoId": "123",
                    "githubRepoName": "widgets",
                    "githubOwner": "octo"
                }));
            })
            .await;

        let project = create_test_client(&server).get_project("p1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(project.repo_id(), Some(123));
        assert_eq!(project.github_owner.as_deref(), Some("octo"));
    }

    #[tokio::test]
    async fn test_find_tasks_passes_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/tasks")
                    .query_param("projectId", "p1")
                    .query_param("githubIssueId", "55");
                then.status(200).json_body(json!([{"id": "t9"}]));
            })
            .await;

        let tasks = create_test_client(&server)
            .find_tasks(&[("projectId", "p1".to_string()), ("githubIssueId", "55".to_string())])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_create_task_returns_id() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/tasks");
                then.status(201).json_body(json!({"id": "t1", "title": "x"}));
            })
            .await;

        let id = create_test_client(&server)
            .create_task(&json!({"title": "x"}))
            .await
            .unwrap();
        assert_eq!(id, Some("t1".to_string()));
    }

    #[tokio::test]
    async fn test_update_project_accepts_empty_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/api/projects/p1");
                then.status(204);
            })
            .await;

        let value = create_test_client(&server)
            .update_project("p1", &json!({"githubRepoId": "1"}))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }
}
