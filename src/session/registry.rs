//! Registry of open debugging sessions.

use crate::dbgeng::{EngineAdapter, EngineFactory};
use crate::error::ToolError;
use crate::session::TargetId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Maps each normalized target path to at most one live engine adapter.
///
/// All operations are blocking from the caller's perspective: they return
/// once the underlying engine call completes. Operations on different targets
/// proceed in parallel; operations on one target queue behind that adapter's
/// engine-call lock. The map itself is only ever locked for the brief
/// insert/lookup/remove, never across an engine call.
pub struct SessionRegistry {
    factory: Arc<dyn EngineFactory>,
    sessions: DashMap<TargetId, Arc<EngineAdapter>>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            sessions: DashMap::new(),
        }
    }

    /// Open a debugging session for `raw_path`.
    ///
    /// Opening an already-open target is not an error: the existing session is
    /// left untouched and reported back. When two opens race on the same
    /// target, the insert is decided by an atomic insert-if-absent; the loser
    /// tears down its own freshly opened adapter so a duplicate engine
    /// instance never stays live.
    pub fn open(&self, raw_path: &str) -> Result<String, ToolError> {
        let target = TargetId::normalize(raw_path)?;
        if self.sessions.contains_key(&target) {
            return Ok(format!("{raw_path} already opened"));
        }

        let adapter = Arc::new(self.factory.create().map_err(ToolError::EngineCreate)?);
        if let Err(e) = adapter.open(&target) {
            // Discard the half-open adapter; never retry on the same engine
            // instance. A teardown failure must not mask the open failure.
            if let Err(close_err) = adapter.close() {
                warn!(path = %target, error = %close_err, "Teardown after failed open also failed");
            }
            return Err(e);
        }

        let lost_race = match self.sessions.entry(target.clone()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(adapter.clone());
                false
            }
        };

        if lost_race {
            // Another open won the insert; drop our duplicate engine.
            info!(path = %target, "Concurrent open already registered this target");
            if let Err(close_err) = adapter.close() {
                warn!(path = %target, error = %close_err, "Teardown of duplicate session failed");
            }
            return Ok(format!("{target} already open"));
        }

        Ok(format!("{target} loaded successfully"))
    }

    /// Run a debugger command against the session for `raw_path`.
    pub fn execute(&self, raw_path: &str, command: &str) -> Result<String, ToolError> {
        let target = TargetId::normalize(raw_path)?;
        let adapter = self
            .sessions
            .get(&target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ToolError::NoSession(target.to_string()))?;
        // The map guard is released; only the adapter's own lock serializes
        // this command against others on the same target.
        adapter.execute(command)
    }

    /// Close the session for `raw_path` and report the engine's outcome.
    ///
    /// The entry is removed before teardown, so a concurrent `execute`
    /// arriving after removal sees "no such session" instead of racing the
    /// closing engine.
    pub fn close(&self, raw_path: &str) -> Result<String, ToolError> {
        let target = TargetId::normalize(raw_path)?;
        let (_, adapter) = self
            .sessions
            .remove(&target)
            .ok_or_else(|| ToolError::NoSession(target.to_string()))?;
        adapter.close()?;
        Ok(format!("Memory dump closed {target}"))
    }

    /// Close every registered session. Used on server shutdown.
    pub fn shutdown_all(&self) {
        let targets: Vec<TargetId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for target in targets {
            if let Some((_, adapter)) = self.sessions.remove(&target) {
                if let Err(e) = adapter.close() {
                    warn!(path = %target, error = %e, "Failed to close session during shutdown");
                }
            }
        }
    }
}
