//! # Graph Runtime
//!
//! The object graph substrate: node store, reference tracker, distance
//! maintainer and cycle collector.
//!
//! All of the state that a sweep, a distance update or a collection needs
//! lives in one [`Graph`] value, so independent graphs never share marks
//! or counters.
//!
//! ## Error model
//!
//! Consistency violations (double primary owner, count underflow, removing
//! a reference that was never set, nested sweeps, duplicate labels) are
//! fatal and panic. Nothing here returns a recoverable error except
//! [`Graph::verify`], which reports instead of asserting.

mod arena;
mod collector;
mod distance;
mod references;
mod store;

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::model::*;
use crate::{Error, Result};
use arena::Arena;

pub use collector::Reachability;

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct SweepState {
    generation: u64,
    active: bool,
}

/// Arena-backed object graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Arena<Node>,
    refs: Arena<Reference>,
    root: Option<RefId>,
    sweep: SweepState,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph with a fresh plain root node.
    pub fn with_root() -> Self {
        let mut graph = Self::new();
        let root = graph.create(Payload::Nul);
        graph.set_root(Some(root));
        graph
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index, id.generation)
    }

    /// # Panics
    ///
    /// On a stale handle.
    pub fn node(&self, id: NodeId) -> &Node {
        self.try_node(id).unwrap_or_else(|| panic!("stale node handle {id}"))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(id.index, id.generation)
            .unwrap_or_else(|| panic!("stale node handle {id}"))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.try_node(id).is_some()
    }

    pub fn try_reference(&self, id: RefId) -> Option<&Reference> {
        self.refs.get(id.index, id.generation)
    }

    pub fn reference(&self, id: RefId) -> &Reference {
        self.try_reference(id).unwrap_or_else(|| panic!("stale reference handle {id}"))
    }

    pub(crate) fn reference_mut(&mut self, id: RefId) -> &mut Reference {
        self.refs
            .get_mut(id.index, id.generation)
            .unwrap_or_else(|| panic!("stale reference handle {id}"))
    }

    /// Node a reference (or item) points at.
    pub fn target(&self, id: RefId) -> NodeId {
        self.reference(id).target
    }

    /// Number of live nodes.
    pub fn live_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn reference_count(&self) -> usize {
        self.refs.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(|(index, generation, _)| NodeId { index, generation })
            .collect()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root.map(|r| self.target(r))
    }

    pub fn sweep_generation(&self) -> u64 {
        self.sweep.generation
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep.active
    }

    // ========================================================================
    // Hints and execution bookkeeping
    // ========================================================================

    pub fn hint(&self, node: NodeId, key: &str) -> Option<&str> {
        self.node(node).hint(key)
    }

    pub fn set_hint(&mut self, node: NodeId, key: impl Into<String>, value: impl Into<String>) {
        self.node_mut(node).hints.insert(key.into(), value.into());
    }

    pub fn exec(&self, node: NodeId) -> &ExecState {
        &self.node(node).exec
    }

    pub fn exec_mut(&mut self, node: NodeId) -> &mut ExecState {
        &mut self.node_mut(node).exec
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn describe(&self, id: NodeId) -> NodeInfo {
        let node = self.node(id);
        let (value, bounds) = match *node.kind() {
            NodeKind::Element { value, .. } => (Some(value), None),
            NodeKind::TypeRange { lower, upper } => (None, Some((lower, upper))),
            _ => (None, None),
        };
        NodeInfo {
            id,
            kind: node.tag(),
            value,
            bounds,
            root_distance: node.root_distance,
            structural_references: node.structural_count,
            references: node.inbound.len(),
            children: node.items.iter().map(|i| i.label.clone()).collect(),
            relations: node.relations.iter().map(|i| i.label.clone()).collect(),
            hints: node.hints.clone(),
        }
    }

    /// Check the reference bookkeeping of every node.
    ///
    /// The structural counter must equal the number of structural inbound
    /// records, each inbound record must target the node and be present on
    /// its holder's side, and at most one inbound record may be primary.
    pub fn verify(&self) -> Result<()> {
        for (index, generation, node) in self.nodes.iter() {
            let id = NodeId { index, generation };
            let mut structural = 0;
            let mut primaries = 0;
            for &r in node.inbound.iter() {
                let reference = self.try_reference(r).ok_or_else(|| {
                    Error::InvariantViolation(format!("{id}: dangling inbound record {r}"))
                })?;
                if reference.target != id {
                    return Err(Error::InvariantViolation(format!(
                        "{id}: inbound {r} targets {}", reference.target
                    )));
                }
                if reference.structural {
                    structural += 1;
                }
                if reference.primary {
                    primaries += 1;
                }
                if !self.holder_has(reference.holder, r) {
                    return Err(Error::InvariantViolation(format!(
                        "{id}: holder {:?} does not hold {r}", reference.holder
                    )));
                }
            }
            if structural != node.structural_count {
                return Err(Error::InvariantViolation(format!(
                    "{id}: structural count {} but {structural} structural references",
                    node.structural_count
                )));
            }
            if primaries > 1 || (primaries == 1 && !node.has_primary) {
                return Err(Error::InvariantViolation(format!(
                    "{id}: {primaries} primary references, has_primary={}", node.has_primary
                )));
            }
        }
        for (index, generation, reference) in self.refs.iter() {
            let r = RefId { index, generation };
            match self.try_node(reference.target) {
                Some(node) if node.inbound.contains(&r) => {}
                _ => {
                    return Err(Error::InvariantViolation(format!(
                        "{r}: not linked into target {}", reference.target
                    )));
                }
            }
        }
        Ok(())
    }

    fn holder_has(&self, holder: Holder, r: RefId) -> bool {
        match holder {
            Holder::Root => self.root == Some(r),
            Holder::Item { parent } => self
                .try_node(parent)
                .is_some_and(|n| n.items.iter().any(|i| i.reference == r)),
            Holder::RelationEntry { owner } => self
                .try_node(owner)
                .is_some_and(|n| n.relations.iter().any(|i| i.reference == r)),
            Holder::ProxyTarget { proxy } => self
                .try_node(proxy)
                .is_some_and(|n| n.kind == NodeKind::Proxy { target: Some(r) }),
            Holder::Operand { node, .. } => self
                .try_node(node)
                .is_some_and(|n| n.kind.operands().contains(&r)),
        }
    }

    /// Nodes not reachable from the root through items, relation entries
    /// or proxy targets.
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.root().into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let node = self.node(id);
            let owned = node.items.iter().chain(node.relations.iter()).map(|i| i.reference);
            for r in owned.chain(self.proxy_ref(id)) {
                queue.push_back(self.target(r));
            }
        }
        self.node_ids().into_iter().filter(|id| !seen.contains(id)).collect()
    }

    /// Release the root and everything it owns. Returns the number of
    /// nodes that survived, i.e. leaked.
    pub fn teardown(&mut self) -> usize {
        self.set_root(None);
        let leaked = self.live_count();
        if leaked > 0 {
            tracing::warn!(leaked, "nodes survived graph teardown");
        }
        leaked
    }
}
