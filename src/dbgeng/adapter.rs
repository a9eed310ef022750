//! Synchronization and output-aggregation wrapper around one engine instance.

use crate::dbgeng::DebugEngine;
use crate::error::ToolError;
use crate::session::TargetId;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, trace};

/// Text accumulator the engine's output callback appends into.
///
/// Scoped to a single command execution: cleared when the command is issued,
/// taken when the engine call returns. The buffer's own lock only protects
/// append-from-callback against read-after-call; it is never held across a
/// native engine call. Isolation between commands comes from the adapter's
/// engine-call lock, not from the buffer.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    buf: Mutex<String>,
}

impl OutputBuffer {
    /// Append an output fragment. Invoked by the engine's callback, possibly
    /// from a different thread than the in-flight engine call.
    pub fn append(&self, fragment: &str) {
        self.lock().push_str(fragment);
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Lifecycle state of one adapter. `Open` is the only state in which commands
/// may execute; `Closed` is terminal and the adapter must be discarded.
#[derive(Debug)]
enum AdapterState {
    Unopened,
    Open(TargetId),
    Closed,
}

struct AdapterInner {
    engine: Box<dyn DebugEngine>,
    state: AdapterState,
}

/// Owns one native engine instance and serializes every interaction with it.
///
/// The inner mutex is the engine-call lock: `open`, `execute` and `close` hold
/// it for the full duration of the (blocking, potentially long-running) native
/// call, which satisfies the engine's single-threaded-use requirement. The
/// output buffer has its own narrower lock so the callback can append while
/// the engine call is in flight.
pub struct EngineAdapter {
    inner: Mutex<AdapterInner>,
    output: Arc<OutputBuffer>,
}

impl EngineAdapter {
    /// Wrap a fresh, unopened engine whose output callback feeds `output`.
    pub fn new(engine: Box<dyn DebugEngine>, output: Arc<OutputBuffer>) -> Self {
        Self {
            inner: Mutex::new(AdapterInner {
                engine,
                state: AdapterState::Unopened,
            }),
            output,
        }
    }

    /// Load the target and block until the engine settles. Transitions to
    /// `Open` only if both steps succeed; a failed open leaves the adapter
    /// untransitioned (the registry discards it rather than retrying).
    pub fn open(&self, target: &TargetId) -> Result<(), ToolError> {
        info!(path = %target, "Opening debuggable file");
        let mut inner = self.lock_inner();
        match &inner.state {
            AdapterState::Unopened => {}
            AdapterState::Open(existing) => {
                let err = ToolError::AlreadyOpen(existing.to_string());
                error!(error = %err, "Rejecting open");
                return Err(err);
            }
            AdapterState::Closed => {
                let err = ToolError::AlreadyOpen("a closed session".to_string());
                error!(error = %err, "Rejecting open");
                return Err(err);
            }
        }

        inner.engine.open_dump_file(target.as_path())?;
        inner.engine.wait_for_event()?;
        inner.state = AdapterState::Open(target.clone());
        info!(path = %target, "Opened debuggable file");
        Ok(())
    }

    /// Run one command and return everything the engine printed for it.
    ///
    /// The engine delivers all output fragments through the callback before
    /// the native call returns, so taking the buffer afterwards captures the
    /// complete output. On engine failure any partial output is not surfaced.
    pub fn execute(&self, command: &str) -> Result<String, ToolError> {
        trace!(command, "Executing command");
        let mut inner = self.lock_inner();
        if !matches!(inner.state, AdapterState::Open(_)) {
            return Err(ToolError::NotOpen);
        }

        self.output.clear();
        inner.engine.execute(command)?;
        let result = self.output.take();
        trace!(command, result = %result, "Done executing command");
        Ok(result)
    }

    /// End the engine session. Safe to call from any state; the registry
    /// uses it to tear down adapters whose open never fully succeeded.
    pub fn close(&self) -> Result<(), ToolError> {
        let mut inner = self.lock_inner();
        info!("Closing debuggable file");
        inner.engine.end_session()?;
        inner.state = AdapterState::Closed;
        info!("Done closing debuggable file");
        Ok(())
    }

    fn lock_inner(&self) -> MutexGuard<'_, AdapterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
