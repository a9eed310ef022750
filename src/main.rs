//! WinDbg (DbgEng) MCP Server
//!
//! This binary runs an MCP server over stdin/stdout that exposes crash dump
//! and TTD trace debugging. The engine requires Windows; on other targets the
//! binary reports the missing engine and exits.

use clap::Parser;
use dbgeng_mcp::{DbgEngMcpServer, EngineFactory, SessionRegistry};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "dbgeng-mcp",
    version,
    about = "WinDbg (DbgEng) crash dump and TTD trace MCP server"
)]
struct Cli {
    /// Directory containing dbgeng.dll and the ttd/ subdirectory (e.g. the
    /// WinDbg installation's amd64 directory). When omitted, dbgeng.dll must
    /// be resolvable through the normal DLL search path.
    #[arg(long, env = "DBGENG_DIR")]
    debugger_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is used for MCP protocol)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dbgeng_mcp=info")),
        )
        .init();

    let cli = Cli::parse();
    let factory = create_factory(cli.debugger_dir.as_deref())?;
    let registry = Arc::new(SessionRegistry::new(factory));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(serve(registry))
}

#[cfg(windows)]
fn create_factory(debugger_dir: Option<&Path>) -> anyhow::Result<Arc<dyn EngineFactory>> {
    dbgeng_mcp::dbgeng::bootstrap(debugger_dir)?;
    Ok(Arc::new(dbgeng_mcp::dbgeng::DbgEngFactory::new()))
}

#[cfg(not(windows))]
fn create_factory(_debugger_dir: Option<&Path>) -> anyhow::Result<Arc<dyn EngineFactory>> {
    anyhow::bail!("dbgeng-mcp requires the Windows debugger engine (dbgeng.dll)")
}

async fn serve(registry: Arc<SessionRegistry>) -> anyhow::Result<()> {
    info!("MCP server listening on stdio");
    let service = DbgEngMcpServer::new(registry.clone()).serve(stdio()).await?;
    service.waiting().await?;

    info!("MCP server shutting down");
    task::spawn_blocking(move || registry.shutdown_all()).await?;
    Ok(())
}
