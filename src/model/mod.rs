//! # Object Graph Model
//!
//! Handles, node variants and reference records shared by the graph
//! substrate, the execution engine and the text adapters.
//!
//! Design rule: this module is pure data. Everything that mutates links
//! lives in [`crate::graph`].

pub mod node;
pub mod reference;
pub mod path;

pub use node::{
    Node, NodeId, NodeKind, KindTag, Payload, Instruction, Item, ExecState,
    NodeInfo, Hints, HINT_BACKEND, HINT_BACKEND_FILE, HINT_FILEPATH,
};
pub use reference::{RefId, Reference, Holder, Operand};
pub use path::{ObjectPath, PROXY_SEGMENT};
