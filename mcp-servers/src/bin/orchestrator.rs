//! Orchestrator MCP server.
//!
//! Breaks epics into tasks, assigns them to agents and tracks progress.
//! State is kept in memory for the life of the process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use studio_mcp::mcp;
use studio_mcp::orchestrator::TaskStore;
use studio_mcp::runtime::{init_tracing, serve};
use studio_mcp::servers::OrchestratorServer;
use studio_mcp::Config;

const DEFAULT_PORT: u16 = 8001;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("orchestrator_server_starting");

    let config = Config::from_env();
    let port = config.port_or(DEFAULT_PORT);
    info!(port = port, "config_loaded");

    let server = OrchestratorServer::new(Arc::new(TaskStore::default()));
    let app = mcp::router(Arc::new(server));

    let addr = SocketAddr::from((config.host, port));
    serve(app, addr, "orchestrator").await.context("Server error")?;

    Ok(())
}
