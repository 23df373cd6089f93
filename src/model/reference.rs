//! Reference records.
//!
//! Every pointer-like field of a node is backed by one [`Reference`] held in
//! the graph's reference arena. The target keeps the ids of all references
//! pointing at it, so any node can enumerate its holders.

use serde::{Deserialize, Serialize};

use super::NodeId;

/// Generational reference handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Display for RefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}v{}", self.index, self.generation)
    }
}

/// Operand slot of an element, pattern or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Type,
    Relation,
    Source,
    Destination,
    Owner,
}

/// Who holds a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Holder {
    /// The designated root slot of the graph.
    Root,
    /// A child slot of `parent`.
    Item { parent: NodeId },
    /// An entry of `owner`'s relation list.
    RelationEntry { owner: NodeId },
    /// The target cell of a proxy.
    ProxyTarget { proxy: NodeId },
    Operand { node: NodeId, slot: Operand },
}

impl Holder {
    /// The node a structural reference hangs from, if any.
    pub fn parent(&self) -> Option<NodeId> {
        match *self {
            Holder::Item { parent } => Some(parent),
            Holder::ProxyTarget { proxy } => Some(proxy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub target: NodeId,
    pub holder: Holder,
    /// Counts toward ownership of the target.
    pub structural: bool,
    /// Canonical owner for display and serialization.
    pub primary: bool,
}
