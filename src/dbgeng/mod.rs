//! Debugger engine abstraction.
//!
//! The engine behind WinDbg (dbgeng.dll) is a stateful COM component that is
//! not safe for concurrent use and that reports command output through a
//! registered callback rather than return values. This module defines the
//! narrow trait the rest of the crate programs against, the adapter that
//! serializes access to one engine instance, and (on Windows) the real
//! DbgEng-backed implementation.

mod adapter;
#[cfg(windows)]
mod native;

pub use adapter::{EngineAdapter, OutputBuffer};
#[cfg(windows)]
pub use native::{bootstrap, DbgEngFactory};

use std::path::Path;
use thiserror::Error;

/// A failed native engine call, carrying the engine's diagnostic text.
#[derive(Debug, Clone, Error)]
#[error("{call} failed: {message}")]
pub struct EngineError {
    /// Name of the native call that failed (e.g. `OpenDumpFile`).
    pub call: &'static str,
    /// Human-readable diagnostic from the engine.
    pub message: String,
}

impl EngineError {
    pub fn new(call: &'static str, message: impl Into<String>) -> Self {
        Self {
            call,
            message: message.into(),
        }
    }
}

/// The subset of the debugger engine the adapter drives.
///
/// All methods are blocking: the engine performs its work (including any
/// internally asynchronous processing) before returning, and delivers every
/// output fragment to the bound output callback before `execute` returns.
/// Implementations are not required to tolerate concurrent calls; the
/// [`EngineAdapter`] serializes all access.
pub trait DebugEngine: Send {
    /// Ask the engine to load a dump or trace file.
    fn open_dump_file(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Block until the pending load event has settled.
    fn wait_for_event(&mut self) -> Result<(), EngineError>;

    /// Execute a debugger command to completion.
    fn execute(&mut self, command: &str) -> Result<(), EngineError>;

    /// End the debugging session.
    fn end_session(&mut self) -> Result<(), EngineError>;
}

/// Constructs fresh, unopened engine adapters.
///
/// A factory failure means the engine itself could not be instantiated (the
/// library is missing or misconfigured) and is surfaced verbatim to the
/// caller; it is an environment-level condition, not a per-target error.
pub trait EngineFactory: Send + Sync {
    /// Create a new engine instance with its output callback bound to a fresh
    /// buffer, wrapped in an unopened [`EngineAdapter`].
    fn create(&self) -> Result<EngineAdapter, EngineError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted mock engine for adapter/registry tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Per-engine script: which calls fail, what `execute` emits, how long it runs.
    #[derive(Default, Clone)]
    pub struct MockBehavior {
        pub fail_open: Option<String>,
        pub fail_wait: Option<String>,
        pub fail_execute: Option<String>,
        pub fail_end: Option<String>,
        /// Fragments appended around each command's output, with the command
        /// text spliced in, e.g. `["<cmd>: begin", "<cmd>: end"]`.
        pub fragments: Vec<String>,
        /// Sleep between fragments while holding no locks, to widen race windows.
        pub fragment_delay: Option<Duration>,
    }

    pub struct MockEngine {
        sink: Arc<OutputBuffer>,
        behavior: MockBehavior,
        ended: Arc<AtomicUsize>,
    }

    impl DebugEngine for MockEngine {
        fn open_dump_file(&mut self, _path: &Path) -> Result<(), EngineError> {
            match &self.behavior.fail_open {
                Some(msg) => Err(EngineError::new("OpenDumpFile", msg.clone())),
                None => Ok(()),
            }
        }

        fn wait_for_event(&mut self) -> Result<(), EngineError> {
            match &self.behavior.fail_wait {
                Some(msg) => Err(EngineError::new("WaitForEvent", msg.clone())),
                None => Ok(()),
            }
        }

        fn execute(&mut self, command: &str) -> Result<(), EngineError> {
            // Deliver one fragment from a foreign thread: the real engine may
            // invoke the output callback from a different thread context than
            // the call site, but always before `execute` returns.
            let sink = self.sink.clone();
            let first = format!("<{command}> ");
            let handle = std::thread::spawn(move || sink.append(&first));
            handle.join().expect("callback thread panicked");

            for fragment in &self.behavior.fragments {
                if let Some(delay) = self.behavior.fragment_delay {
                    std::thread::sleep(delay);
                }
                self.sink.append(&fragment.replace("<cmd>", command));
            }

            match &self.behavior.fail_execute {
                Some(msg) => Err(EngineError::new("Execute", msg.clone())),
                None => Ok(()),
            }
        }

        fn end_session(&mut self) -> Result<(), EngineError> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            match &self.behavior.fail_end {
                Some(msg) => Err(EngineError::new("EndSession", msg.clone())),
                None => Ok(()),
            }
        }
    }

    /// Factory producing [`MockEngine`]s, counting creations and teardowns.
    #[derive(Default)]
    pub struct MockFactory {
        behavior: MockBehavior,
        fail_create: Option<String>,
        created: AtomicUsize,
        ended: Arc<AtomicUsize>,
    }

    impl MockFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_behavior(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                ..Self::default()
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                fail_create: Some(message.to_string()),
                ..Self::default()
            }
        }

        /// Number of engine instances created so far.
        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        /// Number of engine instances whose session has ended.
        pub fn ended(&self) -> usize {
            self.ended.load(Ordering::SeqCst)
        }

        /// Engines created and not yet torn down.
        pub fn live(&self) -> usize {
            self.created() - self.ended()
        }
    }

    impl EngineFactory for MockFactory {
        fn create(&self) -> Result<EngineAdapter, EngineError> {
            if let Some(msg) = &self.fail_create {
                return Err(EngineError::new("DebugCreate", msg.clone()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            let sink = Arc::new(OutputBuffer::default());
            let engine = MockEngine {
                sink: sink.clone(),
                behavior: self.behavior.clone(),
                ended: self.ended.clone(),
            };
            Ok(EngineAdapter::new(Box::new(engine), sink))
        }
    }
}
