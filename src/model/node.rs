//! Node in the object graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::RefId;

/// Generational node handle.
///
/// A handle outlives the node it names; lookups with a stale handle fail
/// instead of aliasing a node that reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Key used for unlabelled nodes in console listings and serialized paths.
    pub fn key(self) -> String {
        format!("K{}v{}K", self.index, self.generation)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Instruction codes interpreted by the execution engine.
///
/// Operands are the instruction node's ordinary children, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    /// `?` (patterns, unknowns, negatives, [continuation])
    Match,
    /// `*` (destination proxy)
    Create,
    /// `=` (destination proxy, source)
    Assign,
    /// `+` (set, object)
    Add,
    /// `-` (set, object)
    Remove,
    /// `!` (named, [unnamed], body)
    Launch,
    /// `<` (named, [unnamed])
    Receive,
    /// `>` (recipient, argument); no operands stops the context
    Send,
    /// `^` (proxy, [target])
    Link,
    /// `~`
    Relate,
}

impl Instruction {
    pub const ALL: [Instruction; 10] = [
        Instruction::Match,
        Instruction::Create,
        Instruction::Assign,
        Instruction::Add,
        Instruction::Remove,
        Instruction::Launch,
        Instruction::Receive,
        Instruction::Send,
        Instruction::Link,
        Instruction::Relate,
    ];

    pub fn symbol(self) -> char {
        match self {
            Instruction::Match => '?',
            Instruction::Create => '*',
            Instruction::Assign => '=',
            Instruction::Add => '+',
            Instruction::Remove => '-',
            Instruction::Launch => '!',
            Instruction::Receive => '<',
            Instruction::Send => '>',
            Instruction::Link => '^',
            Instruction::Relate => '~',
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.symbol() == c)
    }
}

/// Variant payload as stored in the arena.
///
/// Every pointer-like field is a reference record; see [`super::Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Nul,
    Element { ty: RefId, value: i64 },
    TypeRange { lower: i64, upper: i64 },
    Proxy { target: Option<RefId> },
    Pattern { relation: RefId, source: RefId, destination: RefId, owner: RefId },
    Relation { relation: RefId, source: RefId, destination: RefId },
    Code(Instruction),
}

impl NodeKind {
    pub fn tag(&self) -> KindTag {
        match self {
            NodeKind::Nul => KindTag::Nul,
            NodeKind::Element { .. } => KindTag::Element,
            NodeKind::TypeRange { .. } => KindTag::TypeRange,
            NodeKind::Proxy { .. } => KindTag::Proxy,
            NodeKind::Pattern { .. } => KindTag::Pattern,
            NodeKind::Relation { .. } => KindTag::Relation,
            NodeKind::Code(i) => KindTag::Code(*i),
        }
    }

    /// Non-structural operand references (element type, pattern and
    /// relation operands). The proxy target is not an operand.
    pub(crate) fn operands(&self) -> SmallVec<[RefId; 4]> {
        match *self {
            NodeKind::Element { ty, .. } => SmallVec::from_slice(&[ty]),
            NodeKind::Pattern { relation, source, destination, owner } => {
                SmallVec::from_slice(&[relation, source, destination, owner])
            }
            NodeKind::Relation { relation, source, destination } => {
                SmallVec::from_slice(&[relation, source, destination])
            }
            _ => SmallVec::new(),
        }
    }
}

/// Payload-free discriminant, used for comparisons and DTOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KindTag {
    Nul,
    Element,
    TypeRange,
    Proxy,
    Pattern,
    Relation,
    Code(Instruction),
}

/// Handle-level description of a node variant.
///
/// Nodes are only ever created from a payload, so a node cannot exist
/// without the fields its variant requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Nul,
    Element { ty: NodeId, value: i64 },
    TypeRange { lower: i64, upper: i64 },
    Proxy(Option<NodeId>),
    Pattern { relation: NodeId, source: NodeId, destination: NodeId, owner: NodeId },
    Relation { relation: NodeId, source: NodeId, destination: NodeId },
    Code(Instruction),
}

/// Ordered child slot. The item is identified by the reference backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub label: Option<String>,
    pub reference: RefId,
}

/// Bookkeeping used by the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecState {
    /// Activation owning a cloned `Receive`.
    pub context: Option<NodeId>,
    /// Enclosing `Receive` of a slot, for multi-arity joins.
    pub parent_receiver: Option<NodeId>,
    pub armed: u32,
    pub got: u32,
    pub unknown: bool,
    pub negative: bool,
    pub loop_marker: bool,
}

pub type Hints = BTreeMap<String, String>;

pub const HINT_BACKEND: &str = "backend";
pub const HINT_BACKEND_FILE: &str = "file";
pub const HINT_FILEPATH: &str = "filepath";

/// A node in the object graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) items: Vec<Item>,
    pub(crate) relations: Vec<Item>,
    pub(crate) inbound: SmallVec<[RefId; 4]>,
    pub(crate) structural_count: u32,
    pub(crate) root_distance: u32,
    pub(crate) has_primary: bool,
    pub(crate) sweep_mark: u64,
    pub hints: Hints,
    pub exec: ExecState,
}

impl Node {
    pub(crate) fn blank() -> Self {
        Self {
            kind: NodeKind::Nul,
            items: Vec::new(),
            relations: Vec::new(),
            inbound: SmallVec::new(),
            structural_count: 0,
            root_distance: 0,
            has_primary: false,
            sweep_mark: 0,
            hints: Hints::new(),
            exec: ExecState::default(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tag(&self) -> KindTag {
        self.kind.tag()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn relations(&self) -> &[Item] {
        &self.relations
    }

    /// Every reference currently pointing at this node.
    pub fn inbound(&self) -> &[RefId] {
        &self.inbound
    }

    pub fn structural_count(&self) -> u32 {
        self.structural_count
    }

    /// Shortest structural distance from the root; 0 when unreachable.
    pub fn root_distance(&self) -> u32 {
        self.root_distance
    }

    pub fn has_primary(&self) -> bool {
        self.has_primary
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, NodeKind::Proxy { .. })
    }

    pub fn is_code(&self) -> bool {
        matches!(self.kind, NodeKind::Code(_))
    }

    pub fn instruction(&self) -> Option<Instruction> {
        match self.kind {
            NodeKind::Code(i) => Some(i),
            _ => None,
        }
    }

    pub fn hint(&self, key: &str) -> Option<&str> {
        self.hints.get(key).map(String::as_str)
    }
}

/// Read-only description of a node, handed to the console and tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: KindTag,
    pub value: Option<i64>,
    pub bounds: Option<(i64, i64)>,
    pub root_distance: u32,
    pub structural_references: u32,
    pub references: usize,
    pub children: Vec<Option<String>>,
    pub relations: Vec<Option<String>>,
    pub hints: Hints,
}
