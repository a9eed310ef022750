//! MCP server implementation with the WinDbg tools.

mod requests;

pub use requests::*;

use crate::error::ToolError;
use crate::session::SessionRegistry;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, instrument};

/// MCP server mapping the three debugger tools onto the session registry.
///
/// Handlers validate arguments, then run the (blocking) registry operation on
/// the blocking thread pool so a long engine call never stalls the async
/// transport. Concurrent requests for different targets proceed in parallel;
/// requests for one target queue behind its adapter's lock.
#[derive(Clone)]
pub struct DbgEngMcpServer {
    registry: Arc<SessionRegistry>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl DbgEngMcpServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            tool_router: Self::tool_router(),
        }
    }

    /// Request-level argument check: empty/blank required strings are a
    /// protocol error, distinct from any debugging-domain failure, and are
    /// rejected before the registry is touched.
    fn require(name: &'static str, value: &str) -> Result<(), McpError> {
        if value.trim().is_empty() {
            return Err(McpError::invalid_params(
                format!("Argument '{name}' cannot be empty"),
                None,
            ));
        }
        Ok(())
    }

    fn render(result: Result<String, ToolError>) -> CallToolResult {
        match result {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => e.to_tool_result(),
        }
    }

    async fn run_blocking<F>(&self, op: F) -> Result<CallToolResult, McpError>
    where
        F: FnOnce(&SessionRegistry) -> Result<String, ToolError> + Send + 'static,
    {
        let registry = self.registry.clone();
        let result = task::spawn_blocking(move || op(&registry))
            .await
            .map_err(|e| McpError::internal_error(format!("debugger task failed: {e}"), None))?;
        Ok(Self::render(result))
    }

    #[tool(description = "Open a dump file or time travel trace file in WinDbg")]
    #[instrument(skip(self), fields(path = %req.file_path))]
    async fn open_dump_file(
        &self,
        Parameters(req): Parameters<DumpFileRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: open_dump_file");
        Self::require("filePath", &req.file_path)?;
        self.run_blocking(move |registry| registry.open(&req.file_path))
            .await
    }

    #[tool(description = "Execute a command in WinDbg")]
    #[instrument(skip(self), fields(path = %req.file_path))]
    async fn run_windbg_command(
        &self,
        Parameters(req): Parameters<RunWindbgCommandRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: run_windbg_command");
        Self::require("filePath", &req.file_path)?;
        Self::require("command", &req.command)?;
        self.run_blocking(move |registry| registry.execute(&req.file_path, &req.command))
            .await
    }

    #[tool(description = "Closes dump file in WinDbg")]
    #[instrument(skip(self), fields(path = %req.file_path))]
    async fn close_dump_file(
        &self,
        Parameters(req): Parameters<DumpFileRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: close_dump_file");
        Self::require("filePath", &req.file_path)?;
        self.run_blocking(move |registry| registry.close(&req.file_path))
            .await
    }
}

#[tool_handler]
impl ServerHandler for DbgEngMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "WinDbg crash dump and Time Travel Debugging trace server. \
                 \n\nWorkflow: \
                 \n1. open_dump_file: Open a .dmp (memory dump) or .run (TTD trace) file. \
                 \n2. run_windbg_command: Execute debugger commands (e.g. !analyze -v, k, dx) \
                 against the opened file. Pass the same filePath used to open it. \
                 \n3. close_dump_file: Close the file when done. \
                 \n\nSessions are keyed by file path; several files can be open at once and \
                 commands against different files run in parallel. Commands against one file \
                 run strictly one at a time."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbgeng::testing::MockFactory;
    use rmcp::model::ErrorCode;
    use schemars::schema_for;

    fn server() -> DbgEngMcpServer {
        let registry = Arc::new(SessionRegistry::new(Arc::new(MockFactory::new())));
        DbgEngMcpServer::new(registry)
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn dump_lifecycle_scenario() {
        let server = server();

        let opened = server
            .open_dump_file(Parameters(DumpFileRequest {
                file_path: "/d/crash.dmp".into(),
            }))
            .await
            .expect("open should not be a protocol error");
        assert_ne!(opened.is_error, Some(true));
        assert!(text_of(&opened).ends_with("loaded successfully"));

        let ran = server
            .run_windbg_command(Parameters(RunWindbgCommandRequest {
                file_path: "/d/crash.dmp".into(),
                command: "!analyze".into(),
            }))
            .await
            .expect("run should not be a protocol error");
        assert_ne!(ran.is_error, Some(true));
        assert_eq!(text_of(&ran), "<!analyze> ");

        let closed = server
            .close_dump_file(Parameters(DumpFileRequest {
                file_path: "/d/crash.dmp".into(),
            }))
            .await
            .expect("close should not be a protocol error");
        assert_ne!(closed.is_error, Some(true));
        assert!(text_of(&closed).starts_with("Memory dump closed"));

        let rerun = server
            .run_windbg_command(Parameters(RunWindbgCommandRequest {
                file_path: "/d/crash.dmp".into(),
                command: "!analyze".into(),
            }))
            .await
            .expect("run should not be a protocol error");
        assert_eq!(rerun.is_error, Some(true));
        assert!(text_of(&rerun).contains("no open debugger found"));
    }

    #[tokio::test]
    async fn empty_command_is_a_request_level_error() {
        let factory = Arc::new(MockFactory::new());
        let registry = Arc::new(SessionRegistry::new(factory.clone()));
        let server = DbgEngMcpServer::new(registry);

        let err = server
            .run_windbg_command(Parameters(RunWindbgCommandRequest {
                file_path: "/d/crash.dmp".into(),
                command: "   ".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        // Rejected before any registry or engine interaction.
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn empty_path_is_a_request_level_error() {
        let server = server();

        let err = server
            .open_dump_file(Parameters(DumpFileRequest {
                file_path: String::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[test]
    fn request_schemas_mark_arguments_required() {
        let schema = serde_json::to_value(schema_for!(RunWindbgCommandRequest))
            .expect("schema should serialize");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .expect("schema should list required fields")
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"filePath"));
        assert!(required.contains(&"command"));
    }
}
