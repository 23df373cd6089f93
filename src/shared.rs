//! Thread-shareable runtime handle.
//!
//! The engine itself is single-threaded and run-to-block; this wrapper
//! only serializes access so a runtime can be handed between threads.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::engine::{Engine, EngineConfig};
use crate::graph::Graph;

/// Cloneable handle to one engine.
#[derive(Debug, Clone)]
pub struct SharedRuntime {
    inner: Arc<Mutex<Engine>>,
}

impl SharedRuntime {
    pub fn new(engine: Engine) -> Self {
        Self { inner: Arc::new(Mutex::new(engine)) }
    }

    pub fn from_graph(graph: Graph, config: EngineConfig) -> Self {
        Self::new(Engine::new(graph, config))
    }

    /// Block until the engine is free.
    pub fn lock(&self) -> MutexGuard<'_, Engine> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Number of handles sharing this engine.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}
