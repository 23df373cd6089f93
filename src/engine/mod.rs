//! # Execution Engine
//!
//! Cooperative interpreter over the object graph. Activations (contexts)
//! are cloned from `Launch` nodes and scheduled through a FIFO run queue;
//! a context runs until it blocks in `Receive` or terminates.
//!
//! ```text
//! send_message ──► create_context ──► run_queue ──► run()
//!                                        ▲            │
//!                                  wake  │            ▼ Receive
//!                                        └──────── wait_queue
//! ```

pub mod context;
pub mod matcher;
mod scheduler;

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::Graph;
use crate::model::*;
use crate::{Error, Result};

pub use scheduler::{RunStats, Step};

// ============================================================================
// Configuration
// ============================================================================

/// Engine settings, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instruction budget for one `run`; `None` runs until the queue drains.
    pub max_steps: Option<u64>,
    /// Dump the graph when an element with value -1 is executed.
    pub dump_on_sentinel: bool,
    /// Log every dispatched instruction at debug level.
    pub trace_steps: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_steps: None, dump_on_sentinel: true, trace_steps: false }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ============================================================================
// Intrinsic relations
// ============================================================================

/// Well-known relation nodes under `root.relation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsics {
    pub next: NodeId,
    pub prev: NodeId,
    pub me: NodeId,
    pub ty: NodeId,
    pub first: NodeId,
    pub last: NodeId,
    pub proxy: NodeId,
    pub label: NodeId,
}

impl Intrinsics {
    pub const REGISTRY: &'static str = "relation";

    /// Find or create every intrinsic relation node.
    pub fn ensure(graph: &mut Graph) -> Self {
        let root = graph.root().unwrap_or_else(|| panic!("graph has no root"));
        let registry = child_or_create(graph, root, Self::REGISTRY);
        let mut get = |label: &str| child_or_create(graph, registry, label);
        Self {
            next: get("next"),
            prev: get("prev"),
            me: get("me"),
            ty: get("type"),
            first: get("first"),
            last: get("last"),
            proxy: get("proxy"),
            label: get("label"),
        }
    }
}

fn child_or_create(graph: &mut Graph, parent: NodeId, label: &str) -> NodeId {
    if let Some(item) = graph.find_by_label(parent, label) {
        return graph.target(item);
    }
    let node = graph.create(Payload::Nul);
    graph.add_child(parent, node, Some(label), true);
    node
}

// ============================================================================
// Engine
// ============================================================================

/// The graph plus scheduling state.
#[derive(Debug)]
pub struct Engine {
    graph: Graph,
    config: EngineConfig,
    intrinsics: Intrinsics,
    run_queue: VecDeque<NodeId>,
    wait_queue: VecDeque<NodeId>,
}

impl Engine {
    /// # Panics
    ///
    /// When the graph has no root.
    pub fn new(mut graph: Graph, config: EngineConfig) -> Self {
        let intrinsics = Intrinsics::ensure(&mut graph);
        Self { graph, config, intrinsics, run_queue: VecDeque::new(), wait_queue: VecDeque::new() }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn run_queue(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.run_queue.iter().copied()
    }

    pub fn wait_queue(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.wait_queue.iter().copied()
    }

    pub fn is_waiting(&self, ctx: NodeId) -> bool {
        self.wait_queue.contains(&ctx)
    }

    pub fn is_runnable(&self, ctx: NodeId) -> bool {
        self.run_queue.contains(&ctx)
    }

    /// Queue a context for execution.
    pub fn enqueue(&mut self, ctx: NodeId) {
        self.run_queue.push_back(ctx);
    }

    /// Deliver a message from outside the graph.
    ///
    /// A `Launch` recipient gets a fresh context which is queued and run;
    /// a `Receive` recipient is only logged.
    ///
    /// # Panics
    ///
    /// When the recipient is neither a `Launch` nor a `Receive` node.
    pub fn send_message(
        &mut self,
        recipient: NodeId,
        argument: Option<NodeId>,
        return_target: Option<NodeId>,
    ) -> Option<RunStats> {
        match self.graph.node(recipient).instruction() {
            Some(Instruction::Launch) => {
                let ctx = self.graph.create_context(Some(recipient), None, return_target, argument);
                debug!(%recipient, %ctx, "launching");
                self.run_queue.push_back(ctx);
                Some(self.run())
            }
            Some(Instruction::Receive) => {
                debug!(%recipient, "message to receiver");
                None
            }
            _ => panic!("recipient {recipient} is neither a launcher nor a receiver"),
        }
    }

    /// Move a waiting context to the back of the run queue.
    pub(crate) fn wake(&mut self, ctx: NodeId) {
        if let Some(pos) = self.wait_queue.iter().position(|&c| c == ctx) {
            self.wait_queue.remove(pos);
            self.run_queue.push_back(ctx);
            debug!(%ctx, "woken");
        }
    }

    /// Drop a finished context from the registry.
    fn retire(&mut self, ctx: NodeId) {
        if !self.graph.contains(ctx) {
            return;
        }
        let registry = self.graph.context_registry();
        if let Some(item) = self.graph.find_by_node(registry, ctx) {
            self.graph.remove_child(item);
        }
        debug!(%ctx, "context finished");
    }

    /// Log the whole graph in text form.
    fn dump(&self) {
        match crate::export::dump_to_string(&self.graph) {
            Ok(text) => tracing::info!(target: "harmony::dump", "\n{text}"),
            Err(e) => tracing::warn!(error = %e, "graph dump failed"),
        }
    }
}
