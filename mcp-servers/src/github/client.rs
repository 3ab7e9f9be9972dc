//! GitHub REST (and one GraphQL) client.

use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::debug;

use super::types::{
    Hook, HookSpec, Issue, NewIssue, NewPullRequest, PullFile, PullRequest, Repository,
};
use crate::{Error, Result};

pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com";
pub const DEFAULT_API_VERSION: &str = "2022-11-28";

/// Authenticated GitHub API client.
///
/// Repositories are addressed by `full_name` ("owner/repo").
#[derive(Clone)]
pub struct GitHubClient {
    base_url: String,
    api_version: String,
    token: String,
    client: reqwest::Client,
}

impl GitHubClient {
    /// Create a client for api.github.com.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_GITHUB_URL, DEFAULT_API_VERSION, token)
    }

    /// Create a client with a custom base URL (GitHub Enterprise, tests).
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("studio-mcp")
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            token: token.into(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", &self.api_version)
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

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path = %path, "github_get");
        let response = self.send(self.request(Method::GET, path)).await?;
        Ok(response.json().await?)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!(method = %method, path = %path, "github_write");
        let response = self.send(self.request(method, path).json(body)).await?;
        Ok(response.json().await?)
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    pub async fn get_repo(&self, owner: &str, name: &str) -> Result<Repository> {
        self.get_json(&format!("/repos/{}/{}", owner, name)).await
    }

    pub async fn get_repo_by_id(&self, id: u64) -> Result<Repository> {
        self.get_json(&format!("/repositories/{}", id)).await
    }

    // =========================================================================
    // Issues
    // =========================================================================

    pub async fn create_issue(&self, repo: &str, issue: &NewIssue) -> Result<Issue> {
        self.send_json(Method::POST, &format!("/repos/{}/issues", repo), issue)
            .await
    }

    pub async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        self.get_json(&format!("/repos/{}/issues/{}", repo, number))
            .await
    }

    pub async fn close_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        self.send_json(
            Method::PATCH,
            &format!("/repos/{}/issues/{}", repo, number),
            &json!({ "state": "closed" }),
        )
        .await
    }

    /// Add labels to an issue or pull request.
    pub async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/issues/{}/labels", repo, number),
                &json!({ "labels": labels }),
            )
            .await?;
        Ok(())
    }

    pub async fn add_assignees(&self, repo: &str, number: u64, assignees: &[String]) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/issues/{}/assignees", repo, number),
                &json!({ "assignees": assignees }),
            )
            .await?;
        Ok(())
    }

    /// Comment on an issue or pull request. Returns the comment id.
    pub async fn create_comment(&self, repo: &str, number: u64, body: &str) -> Result<u64> {
        let comment: serde_json::Value = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/issues/{}/comments", repo, number),
                &json!({ "body": body }),
            )
            .await?;
        Ok(comment.get("id").and_then(|v| v.as_u64()).unwrap_or_default())
    }

    // =========================================================================
    // Pull requests
    // =========================================================================

    pub async fn create_pull(&self, repo: &str, pull: &NewPullRequest) -> Result<PullRequest> {
        self.send_json(Method::POST, &format!("/repos/{}/pulls", repo), pull)
            .await
    }

    pub async fn get_pull(&self, repo: &str, number: u64) -> Result<PullRequest> {
        self.get_json(&format!("/repos/{}/pulls/{}", repo, number))
            .await
    }

    /// One page of pull requests, newest first.
    pub async fn list_pulls(&self, repo: &str, page: u32, per_page: u32) -> Result<Vec<PullRequest>> {
        self.get_json(&format!(
            "/repos/{}/pulls?state=all&sort=created&direction=desc&per_page={}&page={}",
            repo, per_page, page
        ))
        .await
    }

    pub async fn list_pull_files(&self, repo: &str, number: u64) -> Result<Vec<PullFile>> {
        self.get_json(&format!("/repos/{}/pulls/{}/files?per_page=100", repo, number))
            .await
    }

    pub async fn request_reviewers(
        &self,
        repo: &str,
        number: u64,
        reviewers: &[String],
        team_reviewers: &[String],
    ) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/pulls/{}/requested_reviewers", repo, number),
                &json!({ "reviewers": reviewers, "team_reviewers": team_reviewers }),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_requested_reviewers(
        &self,
        repo: &str,
        number: u64,
        reviewers: &[String],
        team_reviewers: &[String],
    ) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                Method::DELETE,
                &format!("/repos/{}/pulls/{}/requested_reviewers", repo, number),
                &json!({ "reviewers": reviewers, "team_reviewers": team_reviewers }),
            )
            .await?;
        Ok(())
    }

    /// Convert a pull request to draft. REST has no endpoint for this, so the
    /// GraphQL mutation is used with the PR's node id.
    pub async fn convert_to_draft(&self, node_id: &str) -> Result<()> {
        if node_id.is_empty() {
            return Err(Error::InvalidArgument("pull request node_id is empty".to_string()));
        }

        let body = json!({
            "query": "mutation($id: ID!) { convertPullRequestToDraft(input: {pullRequestId: $id}) { pullRequest { isDraft } } }",
            "variables": { "id": node_id },
        });
        let response: serde_json::Value = self.send_json(Method::POST, "/graphql", &body).await?;

        if let Some(errors) = response.get("errors").and_then(|e| e.as_array()) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("GraphQL error")
                    .to_string();
                return Err(Error::Api { status: 200, message });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    pub async fn list_hooks(&self, repo: &str) -> Result<Vec<Hook>> {
        self.get_json(&format!("/repos/{}/hooks", repo)).await
    }

    pub async fn create_hook(&self, repo: &str, spec: &HookSpec) -> Result<Hook> {
        self.send_json(Method::POST, &format!("/repos/{}/hooks", repo), spec)
            .await
    }

    pub async fn update_hook(&self, repo: &str, hook_id: u64, spec: &HookSpec) -> Result<Hook> {
        self.send_json(
            Method::PATCH,
            &format!("/repos/{}/hooks/{}", repo, hook_id),
            spec,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn create_test_client(server: &MockServer) -> GitHubClient {
        GitHubClient::with_base_url(server.base_url(), DEFAULT_API_VERSION, "test-token").unwrap()
    }

    #[tokio::test]
    async fn test_get_repo_sends_auth_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/widgets")
                    .header("Authorization", "Bearer test-token")
                    .header("X-GitHub-Api-Version", DEFAULT_API_VERSION);
                then.status(200).json_body(serde_json::json!({
                    "id": 123,
                    "name": "widgets",
                    "full_name": "octo/widgets",
                    "owner": {"login": "octo", "id": 1},
                    "html_url": "https://github.com/octo/widgets",
                    "default_branch": "main",
                    "private": false
                }));
            })
            .await;

        let repo = create_test_client(&server).get_repo("octo", "widgets").await.unwrap();

        mock.assert_async().await;
        assert_eq!(repo.id, 123);
        assert_eq!(repo.full_name, "octo/widgets");
        assert_eq!(repo.owner.login, "octo");
    }

    #[tokio::test]
    async fn test_api_error_carries_github_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repositories/9");
                then.status(404).json_body(serde_json::json!({"message": "Not Found"}));
            })
            .await;

        let err = create_test_client(&server).get_repo_by_id(9).await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "API error: 404 - Not Found");
    }

    #[tokio::test]
    async fn test_add_labels() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/octo/widgets/issues/7/labels")
                    .json_body(serde_json::json!({"labels": ["bug", "size/S"]}));
                then.status(200).json_body(serde_json::json!([{"name": "bug"}]));
            })
            .await;

        create_test_client(&server)
            .add_labels("octo/widgets", 7, &["bug".to_string(), "size/S".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_pulls_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/widgets/pulls")
                    .query_param("state", "all")
                    .query_param("sort", "created")
                    .query_param("direction", "desc")
                    .query_param("per_page", "100")
                    .query_param("page", "2");
                then.status(200).json_body(serde_json::json!([
                    {"number": 5, "state": "open", "created_at": "2024-03-01T00:00:00Z"}
                ]));
            })
            .await;

        let pulls = create_test_client(&server)
            .list_pulls("octo/widgets", 2, 100)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].number, 5);
    }

    #[tokio::test]
    async fn test_convert_to_draft_reports_graphql_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/graphql");
                then.status(200).json_body(serde_json::json!({
                    "errors": [{"message": "Resource not accessible by integration"}]
                }));
            })
            .await;

        let client = create_test_client(&server);
        let err = client.convert_to_draft("PR_kw123").await.unwrap_err();
        assert!(err.to_string().contains("Resource not accessible"));

        assert!(client.convert_to_draft("").await.is_err());
    }
}
