//! Studio MCP servers.
//!
//! Shared modules for the two Studio MCP binaries:
//! - `github-mcp`: GitHub integration tools plus the webhook receiver
//! - `orchestrator-mcp`: task breakdown, assignment and scheduling
//!
//! ## Architecture
//!
//! ```text
//! GitHub → POST /webhooks/github → signature check → Dispatcher (background)
//!                                                        ├→ PR automation → GitHub API
//!                                                        └→ Studio API (tasks, events)
//!
//! Agent  → POST /tools/:name → McpServer → GitHub API / Studio API / TaskStore
//! ```

pub mod automation;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod github;
pub mod mcp;
pub mod metrics;
pub mod orchestrator;
pub mod runtime;
pub mod servers;
pub mod studio;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use mcp::McpServer;
