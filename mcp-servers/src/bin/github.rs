//! GitHub MCP server.
//!
//! Serves the GitHub integration tools over the MCP routes and receives
//! GitHub webhooks on `POST /webhooks/github`. Deliveries are verified,
//! acknowledged with 202 and processed in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use studio_mcp::cache::MemoryCache;
use studio_mcp::runtime::{init_tracing, serve};
use studio_mcp::servers::{github, GitHubServer};
use studio_mcp::web::is_signature_verification_enabled;
use studio_mcp::Config;

const DEFAULT_PORT: u16 = 8002;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("github_server_starting");

    let config = Config::from_env();
    let port = config.port_or(DEFAULT_PORT);
    info!(
        port = port,
        github_token_configured = config.github_token.is_some(),
        signature_verification = is_signature_verification_enabled(&config.github_webhook_secret),
        studio_api_url = %config.studio_api_url,
        "config_loaded"
    );

    let server = GitHubServer::from_config(&config, Arc::new(MemoryCache::new()))
        .context("Failed to build GitHub server")?;
    let app = github::router(Arc::new(server));

    let addr = SocketAddr::from((config.host, port));
    serve(app, addr, "github").await.context("Server error")?;

    Ok(())
}
