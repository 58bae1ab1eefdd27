//! One-time initialization and shutdown of the embedded engine.

use std::cell::Cell;
use std::rc::Rc;
use tracing::{error, info, warn};

use crate::browser::engine::Engine;

/// Lifecycle state of the engine subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Shutdown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "Uninitialized"),
            EngineState::Initializing => write!(f, "Initializing"),
            EngineState::Ready => write!(f, "Ready"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Owns the engine-wide init/shutdown pair.
///
/// Initialization is idempotent while `Ready`. Re-initializing after
/// [`shutdown`](EngineHandle::shutdown) is refused: native engines generally
/// cannot be brought back up inside the same process.
pub struct EngineHandle {
    engine: Rc<dyn Engine>,
    state: Cell<EngineState>,
}

impl EngineHandle {
    pub fn new(engine: Rc<dyn Engine>) -> Self {
        Self {
            engine,
            state: Cell::new(EngineState::Uninitialized),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state.get() == EngineState::Ready
    }

    pub(crate) fn engine(&self) -> &Rc<dyn Engine> {
        &self.engine
    }

    /// Brings the engine up. Returns `true` when the engine is `Ready`
    /// afterwards.
    pub fn initialize(&self) -> bool {
        match self.state.get() {
            EngineState::Ready => true,
            EngineState::Initializing => {
                warn!("Engine initialization requested while already initializing");
                false
            }
            EngineState::ShuttingDown | EngineState::Shutdown => {
                warn!(
                    "Engine re-initialization after shutdown is not supported (state: {})",
                    self.state.get()
                );
                false
            }
            EngineState::Uninitialized => {
                self.state.set(EngineState::Initializing);
                match self.engine.initialize() {
                    Ok(()) => {
                        self.state.set(EngineState::Ready);
                        info!("Engine initialized");
                        true
                    }
                    Err(e) => {
                        self.state.set(EngineState::Uninitialized);
                        error!("Engine initialization failed: {}", e);
                        false
                    }
                }
            }
        }
    }

    /// Shuts the engine down. Only valid from `Ready`; the caller must have
    /// released any live browser first.
    pub fn shutdown(&self) -> bool {
        if self.state.get() != EngineState::Ready {
            warn!("Engine shutdown ignored in state {}", self.state.get());
            return false;
        }

        self.state.set(EngineState::ShuttingDown);
        self.engine.shutdown();
        self.state.set(EngineState::Shutdown);
        info!("Engine shut down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::engine::MockEngine;

    #[test]
    fn test_initialize_is_idempotent() {
        let engine = MockEngine::new();
        let handle = EngineHandle::new(Rc::new(engine.clone()));

        assert_eq!(handle.state(), EngineState::Uninitialized);
        assert!(handle.initialize());
        assert!(handle.initialize());
        assert!(handle.is_ready());
        assert_eq!(engine.init_calls(), 1);
    }

    #[test]
    fn test_failed_initialization_keeps_no_state() {
        let engine = MockEngine::new().with_init_failure("incompatible OS");
        let handle = EngineHandle::new(Rc::new(engine.clone()));

        assert!(!handle.initialize());
        assert_eq!(handle.state(), EngineState::Uninitialized);

        // A later attempt reaches the engine again.
        assert!(!handle.initialize());
        assert_eq!(engine.init_calls(), 2);
    }

    #[test]
    fn test_shutdown_transitions() {
        let engine = MockEngine::new();
        let handle = EngineHandle::new(Rc::new(engine.clone()));

        assert!(!handle.shutdown());
        assert!(handle.initialize());
        assert!(handle.shutdown());
        assert_eq!(handle.state(), EngineState::Shutdown);
        assert!(engine.is_shut_down());

        assert!(!handle.shutdown());
    }

    #[test]
    fn test_reinitialize_after_shutdown_is_refused() {
        let engine = MockEngine::new();
        let handle = EngineHandle::new(Rc::new(engine.clone()));

        handle.initialize();
        handle.shutdown();

        assert!(!handle.initialize());
        assert_eq!(handle.state(), EngineState::Shutdown);
        assert_eq!(engine.init_calls(), 1);
    }
}
