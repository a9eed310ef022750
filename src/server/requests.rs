//! MCP tool request types.

use schemars::JsonSchema;
use serde::Deserialize;

/// Parameters for `open_dump_file` and `close_dump_file` (both take only the
/// target path).
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DumpFileRequest {
    #[schemars(
        description = "Full file path for .dmp (memory dump) or .run (time travel trace) file"
    )]
    #[serde(rename = "filePath", alias = "path")]
    pub file_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunWindbgCommandRequest {
    #[schemars(
        description = "Full file path for .dmp (memory dump) or .run (time travel trace) file"
    )]
    #[serde(rename = "filePath", alias = "path")]
    pub file_path: String,
    #[schemars(description = "Command to execute")]
    pub command: String,
}
