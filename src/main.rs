use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use mcp_ops::config::SshTargets;
use mcp_ops::proxy::CommandProxy;
use mcp_ops::remote::{RusshConnector, SshExecutor};
use mcp_ops::server;
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

/// MCP server for operations: raw Redis commands and SSH command execution.
///
/// SSH servers are configured with one environment variable per server:
/// SSH_<name>_URI=username:password@host:port
#[derive(Parser)]
#[command(name = "mcp-ops", version, about)]
struct Cli {
    /// Redis connection URL. Takes precedence over --url-env.
    /// Example: redis://127.0.0.1:6379
    #[arg(long)]
    url: Option<String>,

    /// Environment variable holding the Redis connection URL.
    #[arg(long, default_value = "REDIS_URI")]
    url_env: String,

    /// Abort remote commands that run longer than this many seconds.
    /// By default remote commands may run indefinitely.
    #[arg(long)]
    ssh_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let url = match cli.url {
        Some(url) => url,
        None => std::env::var(&cli.url_env)
            .map_err(|_| anyhow!("{} environment variable is not set.", cli.url_env))?,
    };

    let client = redis::Client::open(url.as_str())
        .map_err(|e| anyhow!("Invalid Redis URL '{}': {}", redact_url(&url), e))?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .map_err(|e| anyhow!("Cannot connect to '{}': {}", redact_url(&url), e))?;
    tracing::info!(url = %redact_url(&url), "Connected to Redis");

    let targets = SshTargets::from_env()?;
    for target in targets.iter() {
        tracing::info!(server = %target.alias, address = %target.display_address(), "Configured SSH server");
    }

    let executor = SshExecutor::new(targets, Arc::new(RusshConnector::new()))
        .with_timeout(cli.ssh_timeout_secs.map(Duration::from_secs));

    tracing::info!(
        ssh_servers = executor.targets().len(),
        ssh_timeout_secs = ?cli.ssh_timeout_secs,
        "Starting mcp-ops server"
    );

    let service = server::McpOpsServer::new(CommandProxy::new(Arc::new(conn)), executor);
    let running = service.serve(stdio()).await?;
    running.waiting().await?;

    Ok(())
}

fn redact_url(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}
