use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{schemars, tool, tool_handler, tool_router, ServerHandler};
use serde::Deserialize;

use crate::error::McpOpsError;
use crate::proxy::CommandProxy;
use crate::remote::SshExecutor;

#[derive(Clone)]
pub struct McpOpsServer {
    proxy: CommandProxy,
    executor: Arc<SshExecutor>,
    tool_router: ToolRouter<Self>,
}

// -- Tool parameter types --

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct RedisToolParams {
    #[schemars(
        description = "The Redis command to execute (e.g., 'GET', 'SET', 'HGETALL', 'LPUSH', 'ZADD', etc.). Required."
    )]
    #[serde(default)]
    pub command: Option<String>,

    #[schemars(
        description = "The arguments for the Redis command, provided in JSON string format. For example, for SET: '[\"key\", \"value\"]', for HSET: '[\"hash\", \"field\", \"value\"]'."
    )]
    #[serde(default)]
    pub args: Option<String>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshToolParams {
    #[schemars(
        description = "The name of the SSH server to connect to (configured as SSH_<name>_URI). Required."
    )]
    #[serde(default)]
    pub server_name: Option<String>,

    #[schemars(description = "The command to execute on the SSH server. Required.")]
    #[serde(default)]
    pub command: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn json_result(value: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(value.to_string())])
}

impl McpOpsServer {
    pub fn new(proxy: CommandProxy, executor: SshExecutor) -> Self {
        Self {
            proxy,
            executor: Arc::new(executor),
            tool_router: Self::tool_router(),
        }
    }

    pub fn executor(&self) -> &SshExecutor {
        &self.executor
    }
}

// -- Public methods for testability --

impl McpOpsServer {
    pub async fn do_redis_tool(&self, params: RedisToolParams) -> Result<CallToolResult, ErrorData> {
        let Some(command) = present(&params.command) else {
            return Ok(McpOpsError::MissingParameters("command").to_tool_result());
        };

        match self.proxy.execute(command, params.args.as_deref()).await {
            Ok(value) => Ok(json_result(&value)),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    pub async fn do_ssh_tool(&self, params: SshToolParams) -> Result<CallToolResult, ErrorData> {
        let (Some(server), Some(command)) = (present(&params.server_name), present(&params.command))
        else {
            return Ok(McpOpsError::MissingParameters("serverName, command").to_tool_result());
        };

        match self.executor.run(server, command).await {
            Ok(out) => Ok(json_result(&serde_json::json!({
                "output": out.output,
                "server": server,
                "command": command,
                "exit_code": out.exit_code,
            }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    pub async fn do_list_servers(&self) -> Result<CallToolResult, ErrorData> {
        let servers: Vec<serde_json::Value> = self
            .executor
            .targets()
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.alias,
                    "address": t.display_address(),
                })
            })
            .collect();

        let text = serde_json::to_string_pretty(&servers).unwrap_or_else(|_| "[]".to_string());
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

// -- MCP tool handlers (thin wrappers) --

#[tool_router]
impl McpOpsServer {
    #[tool(
        name = "redis_tool",
        description = "Execute any Redis command, fully supporting all Redis operations, including strings, hashes, lists, sets, sorted sets, streams, etc."
    )]
    async fn redis_tool(
        &self,
        Parameters(params): Parameters<RedisToolParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_redis_tool(params).await
    }

    #[tool(
        name = "ssh_tool",
        description = "Connect to an SSH server by name and execute a shell command. Returns stdout with stderr lines prefixed by 'ERROR: ', plus the exit code."
    )]
    async fn ssh_tool(
        &self,
        Parameters(params): Parameters<SshToolParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_ssh_tool(params).await
    }

    #[tool(
        name = "list_servers",
        description = "List the SSH servers that can be used with ssh_tool (passwords are never shown)"
    )]
    async fn list_servers(&self) -> Result<CallToolResult, ErrorData> {
        self.do_list_servers().await
    }
}

#[tool_handler]
impl ServerHandler for McpOpsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-ops".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Operations server. Tools: redis_tool (run any Redis command, args as a JSON \
                 array string), ssh_tool (run a shell command on a named SSH server), \
                 list_servers (configured SSH server names)."
                    .to_string(),
            ),
        }
    }
}
