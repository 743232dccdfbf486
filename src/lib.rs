//! MCP server that gives LLM agents two operational tools: a raw Redis
//! command proxy and an SSH command runner for named remote servers.
//!
//! SSH sessions are cached per server alias and shared by concurrent callers.

pub mod config;
pub mod error;
pub mod proxy;
pub mod remote;
pub mod server;
