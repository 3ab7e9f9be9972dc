//! The concrete MCP servers, one per binary.

pub mod github;
pub mod orchestrator;

pub use github::{webhook_url, GitHubServer, WebhookRegistration};
pub use orchestrator::OrchestratorServer;
