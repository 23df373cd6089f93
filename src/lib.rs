//! # harmony-graph: Homoiconic Object Graph
//!
//! A mutable graph where data and code share one representation, kept
//! alive by structural reference counting with local cycle collection,
//! and driven by a cooperative interpreter whose activations are cloned
//! subgraphs.
//!
//! ## Design Principles
//!
//! 1. **Handles, not pointers**: nodes and reference records live in
//!    generational arenas; `NodeId` and `RefId` cross every boundary
//! 2. **Structural ownership**: a node lives while some structural
//!    reference holds it; unreachable cycles are ripped on the spot
//! 3. **Code is data**: instructions are nodes, operands are children
//! 4. **Text is an adapter**: the loader and the serializer only use the
//!    public graph API
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harmony_graph::{text, Engine, EngineConfig, ObjectPath};
//!
//! # fn example() -> harmony_graph::Result<()> {
//! let graph = text::load_str("(main: !(named: (), body: ()))")?;
//! let mut engine = Engine::new(graph, EngineConfig::default());
//! let main = engine
//!     .graph()
//!     .object_by_path(&ObjectPath::absolute(["main"]), None)
//!     .expect("main is loaded");
//! engine.send_message(main, None, None);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod graph;
pub mod engine;
pub mod text;
pub mod export;
pub mod console;
pub mod shared;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    Node, NodeId, NodeKind, KindTag, Payload, Instruction, ExecState,
    NodeInfo, RefId, Reference, Holder, ObjectPath,
};

pub use graph::{Graph, Reachability};

pub use engine::{Engine, EngineConfig, Intrinsics, RunStats};

pub use console::Console;

pub use shared::SharedRuntime;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unresolved reference `{path}` at position {position}")]
    UnresolvedReference { path: String, position: usize },

    #[error("duplicate label `{label}` at position {position}")]
    DuplicateLabel { label: String, position: usize },

    #[error("load error: {0}")]
    Load(String),

    #[error("node {0} has no canonical path")]
    Unaddressable(NodeId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
