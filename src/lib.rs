//! WinDbg (DbgEng) MCP Server
//!
//! This library provides an MCP (Model Context Protocol) server that lets LLM
//! agents open Windows crash dumps and Time Travel Debugging traces and run
//! WinDbg commands against them.
//!
//! # Architecture
//!
//! The debugger engine (dbgeng.dll) must not be used concurrently, performs
//! target loading asynchronously behind a blocking wait, and reports command
//! output through a registered callback rather than return values. The crate
//! is shaped around those three constraints:
//!
//! - **[`dbgeng::EngineAdapter`]**: wraps one engine instance, serializing
//!   `open`/`execute`/`close` behind a single engine-call lock and collecting
//!   callback output into a per-command buffer with its own narrower lock.
//!
//! - **[`session::SessionRegistry`]**: maps each normalized, case-insensitive
//!   target path to at most one live adapter, with atomic insert-if-absent
//!   semantics so racing opens never leak a duplicate engine instance.
//!
//! - **[`server::DbgEngMcpServer`]**: the MCP server. Uses the `rmcp` crate
//!   for protocol handling and bridges the blocking engine calls onto tokio's
//!   blocking thread pool.
//!
//! The real engine binding lives in `dbgeng::native` (Windows only); the rest
//! of the crate is portable and programs against the [`dbgeng::DebugEngine`]
//! trait.
//!
//! # Tools
//!
//! - `open_dump_file`: Open a .dmp (memory dump) or .run (TTD trace) file
//! - `run_windbg_command`: Execute a debugger command against an open file
//! - `close_dump_file`: Close an open file and end its session

pub mod dbgeng;
pub mod error;
pub mod server;
pub mod session;

pub use dbgeng::{DebugEngine, EngineAdapter, EngineError, EngineFactory, OutputBuffer};
pub use error::ToolError;
pub use server::DbgEngMcpServer;
pub use session::{SessionRegistry, TargetId};
