//! Raw Redis command passthrough: argument decoding, reply reshaping and
//! error hints.

use std::sync::Arc;

use async_trait::async_trait;
use redis::{Cmd, ErrorKind, RedisError, RedisResult, Value};
use serde_json::{json, Map};

use crate::error::{McpOpsError, Result};

pub const ARGS_FORMAT_HINT: &str =
    "'args' should be a valid JSON array string. For example: '[\"key\", \"value\"]'";

/// Anything that can run a single Redis command.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn query(&self, cmd: &Cmd) -> RedisResult<Value>;
}

#[async_trait]
impl CommandStore for redis::aio::ConnectionManager {
    async fn query(&self, cmd: &Cmd) -> RedisResult<Value> {
        let mut conn = self.clone();
        cmd.query_async(&mut conn).await
    }
}

#[derive(Clone)]
pub struct CommandProxy {
    store: Arc<dyn CommandStore>,
}

impl CommandProxy {
    pub fn new(store: Arc<dyn CommandStore>) -> Self {
        Self { store }
    }

    /// Runs `command` with the JSON-encoded `args` and returns the reshaped
    /// reply. Argument errors are reported before the store is contacted.
    pub async fn execute(&self, command: &str, args: Option<&str>) -> Result<serde_json::Value> {
        let command = command.trim().to_uppercase();
        if command.is_empty() {
            return Err(McpOpsError::MissingParameters("command"));
        }
        let args = parse_args(args)?;

        let mut cmd = redis::cmd(&command);
        for arg in encode_args(&args) {
            cmd.arg(arg);
        }

        tracing::debug!(command = %command, argc = args.len(), "Forwarding Redis command");

        match self.store.query(&cmd).await {
            Ok(reply) => Ok(shape_reply(&command, reply)),
            Err(source) => {
                tracing::warn!(command = %command, error = %source, "Redis command failed");
                Err(McpOpsError::Command {
                    command,
                    args,
                    source,
                })
            }
        }
    }
}

/// Decodes the `args` parameter. Absent or empty means no arguments.
pub fn parse_args(raw: Option<&str>) -> Result<Vec<serde_json::Value>> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(Vec::new()),
    };
    match serde_json::from_str(raw).map_err(McpOpsError::InvalidArgsJson)? {
        serde_json::Value::Array(items) => Ok(items),
        _ => Err(McpOpsError::ArgsNotArray),
    }
}

/// Turns JSON arguments into Redis arguments. Nested arrays are spread one
/// level deep; objects travel as their JSON text.
pub fn encode_args(args: &[serde_json::Value]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            serde_json::Value::Array(items) => out.extend(items.iter().map(encode_scalar)),
            other => out.push(encode_scalar(other)),
        }
    }
    out
}

fn encode_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Converts a Redis reply into JSON. A nil reply becomes `{"result": null}`
/// and HGETALL's flat field/value list becomes an object.
pub fn shape_reply(command: &str, reply: Value) -> serde_json::Value {
    match reply {
        Value::Nil => json!({ "result": null }),
        Value::Array(items) if command == "HGETALL" => pair_up(items),
        other => to_json(other),
    }
}

/// `[k1, v1, k2, v2]` to `{k1: v1, k2: v2}`. A trailing unpaired element is
/// dropped.
pub fn pair_up(items: Vec<Value>) -> serde_json::Value {
    let mut map = Map::new();
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        map.insert(key_text(k), to_json(v));
    }
    serde_json::Value::Object(map)
}

fn key_text(value: Value) -> String {
    match to_json(value) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Int(i) => json!(i),
        Value::BulkString(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        Value::SimpleString(s) => serde_json::Value::String(s),
        Value::Okay => serde_json::Value::String("OK".to_string()),
        Value::Array(items) | Value::Set(items) => {
            serde_json::Value::Array(items.into_iter().map(to_json).collect())
        }
        Value::Map(pairs) => serde_json::Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (key_text(k), to_json(v)))
                .collect(),
        ),
        Value::Double(d) => json!(d),
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::VerbatimString { text, .. } => serde_json::Value::String(text),
        Value::Attribute { data, .. } => to_json(*data),
        other => serde_json::Value::String(format!("{other:?}")),
    }
}

/// Coarse category of a failed command, used to pick a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    WrongArity,
    WrongType,
    NoSuchKey,
    Connection,
    Authentication,
    Other,
}

pub fn classify(err: &RedisError) -> ErrorClass {
    if err.code() == Some("WRONGTYPE") {
        return ErrorClass::WrongType;
    }
    if err.kind() == ErrorKind::AuthenticationFailed
        || matches!(err.code(), Some("NOAUTH" | "WRONGPASS"))
    {
        return ErrorClass::Authentication;
    }
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        return ErrorClass::Connection;
    }
    classify_message(&err.to_string())
}

/// The error text as the server sent it (`ERR wrong number of ...`), or the
/// client's own description for errors that never reached the server.
pub fn server_message(err: &RedisError) -> String {
    match (err.code(), err.detail()) {
        (Some(code), Some(detail)) => format!("{code} {detail}"),
        _ => err.to_string(),
    }
}

/// Best-effort: the server reports arity and missing-key problems only as
/// free text under the generic `ERR` code.
pub fn classify_message(message: &str) -> ErrorClass {
    if message.contains("wrong number of arguments") {
        ErrorClass::WrongArity
    } else if message.contains("WRONGTYPE") {
        ErrorClass::WrongType
    } else if message.contains("no such key") {
        ErrorClass::NoSuchKey
    } else {
        ErrorClass::Other
    }
}

pub fn error_hint(command: &str, class: ErrorClass) -> String {
    match class {
        ErrorClass::WrongArity => syntax_hint(command),
        ErrorClass::WrongType => {
            "The data type of the key does not match the requested command operation.".to_string()
        }
        ErrorClass::NoSuchKey => "The specified key does not exist.".to_string(),
        ErrorClass::Connection => "Could not reach the Redis server. Check that it is running \
                                   and that the connection URL is correct."
            .to_string(),
        ErrorClass::Authentication => {
            "Authentication failed. Check the credentials in the Redis connection URL.".to_string()
        }
        ErrorClass::Other => "Please check the command syntax and parameters.".to_string(),
    }
}

pub fn syntax_hint(command: &str) -> String {
    let syntax = match command {
        "GET" => "GET key",
        "SET" => "SET key value [EX seconds] [PX milliseconds] [NX|XX]",
        "HGET" => "HGET key field",
        "HSET" => "HSET key field value [field value ...]",
        "HGETALL" => "HGETALL key",
        "LPUSH" => "LPUSH key element [element ...]",
        "RPUSH" => "RPUSH key element [element ...]",
        "LRANGE" => "LRANGE key start stop",
        "SADD" => "SADD key member [member ...]",
        "SMEMBERS" => "SMEMBERS key",
        "ZADD" => "ZADD key score member [score member ...]",
        "ZRANGE" => "ZRANGE key start stop [WITHSCORES]",
        "DEL" => "DEL key [key ...]",
        "EXISTS" => "EXISTS key [key ...]",
        "EXPIRE" => "EXPIRE key seconds",
        "TTL" => "TTL key",
        "INCR" => "INCR key",
        "DECR" => "DECR key",
        _ => {
            return format!("Please consult the Redis documentation for the syntax of {command}.")
        }
    };
    syntax.to_string()
}
