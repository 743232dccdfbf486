use std::time::Duration;

use rmcp::model::{CallToolResult, Content};
use serde_json::json;

use crate::proxy;

#[derive(Debug, thiserror::Error)]
pub enum McpOpsError {
    #[error("Missing required parameters: {0}")]
    MissingParameters(&'static str),

    #[error("Invalid JSON format for the 'args' parameter")]
    InvalidArgsJson(#[source] serde_json::Error),

    #[error("'args' must be a JSON array")]
    ArgsNotArray,

    #[error("Redis error: {source}")]
    Command {
        command: String,
        args: Vec<serde_json::Value>,
        #[source]
        source: redis::RedisError,
    },

    #[error("Invalid value for {var}: {reason}")]
    InvalidTarget { var: String, reason: String },

    #[error("SSH_{0}_URI environment variable must be set.")]
    UnknownServer(String),

    #[error("SSH connection error: {0}")]
    Connect(String),

    #[error("SSH connection error: authentication rejected for user '{0}'")]
    AuthRejected(String),

    #[error("Command execution failed: {0}")]
    ChannelOpen(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl McpOpsError {
    /// Renders the error as an `isError: true` tool result carrying a JSON
    /// payload, so callers always receive structured output.
    pub fn to_tool_result(&self) -> CallToolResult {
        let payload = match self {
            McpOpsError::InvalidArgsJson(_) | McpOpsError::ArgsNotArray => json!({
                "error": self.to_string(),
                "hint": proxy::ARGS_FORMAT_HINT,
            }),
            McpOpsError::Command {
                command,
                args,
                source,
            } => json!({
                "error": {
                    "code": source.code().unwrap_or("REDIS_ERROR"),
                    "message": proxy::server_message(source),
                },
                "command": command,
                "args": args,
                "hint": proxy::error_hint(command, proxy::classify(source)),
            }),
            _ => json!({ "error": self.to_string() }),
        };
        CallToolResult::error(vec![Content::text(payload.to_string())])
    }
}

pub type Result<T> = std::result::Result<T, McpOpsError>;
