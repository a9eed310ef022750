//! Error types for the DbgEng MCP server.
//!
//! Tool execution errors are returned with `is_error: true` in CallToolResult,
//! while request-level errors (missing/empty arguments) are surfaced as
//! protocol `invalid_params` errors and never reach the session registry.

use crate::dbgeng::EngineError;
use rmcp::model::{CallToolResult, Content};
use thiserror::Error;

/// Tool execution errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to parse path: {0}")]
    InvalidPath(String),

    #[error("Debugger already attached to: {0}")]
    AlreadyOpen(String),

    #[error("No debuggable file is open")]
    NotOpen,

    #[error("no open debugger found for {0}")]
    NoSession(String),

    /// The engine could not be instantiated at all (environment-level).
    #[error("{0}")]
    EngineCreate(EngineError),

    /// A load/execute/end-session call failed inside a live engine.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(self.to_string())],
            is_error: Some(true),
            meta: None,
            structured_content: None,
        }
    }
}
