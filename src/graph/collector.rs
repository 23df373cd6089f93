//! Cycle collector.
//!
//! Runs when a node loses a structural reference but keeps others. An
//! ancestor walk decides whether the node still hangs from the root slot;
//! if not, the region below it that nothing outside holds is cut loose
//! and ordinary reference counting takes it down.

use hashbrown::HashSet;
use serde::Serialize;
use tracing::debug;

use crate::model::*;
use super::Graph;

/// Outcome of an ancestor walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Reachability {
    /// Some ancestor sits in the root slot.
    pub reachable: bool,
    /// The start node is among its own ancestors.
    pub cycle: bool,
}

impl Graph {
    /// Run `f` under a fresh sweep generation.
    ///
    /// # Panics
    ///
    /// When another sweep is already in flight.
    pub(crate) fn with_sweep<R>(&mut self, f: impl FnOnce(&mut Self, u64) -> R) -> R {
        assert!(!self.sweep.active, "sweep already in flight");
        self.sweep.active = true;
        self.sweep.generation += 1;
        let mark = self.sweep.generation;
        let result = f(self, mark);
        self.sweep.active = false;
        result
    }

    pub(crate) fn is_marked(&self, node: NodeId, mark: u64) -> bool {
        self.node(node).sweep_mark == mark
    }

    pub(crate) fn mark(&mut self, node: NodeId, mark: u64) {
        self.node_mut(node).sweep_mark = mark;
    }

    /// Walk structural ancestors of `start` looking for the root slot.
    pub fn is_reachable(&mut self, start: NodeId) -> Reachability {
        self.walk_ancestors(start).0
    }

    /// Ancestor walk; also returns every node visited, `start` included.
    /// The list is complete only when the result is unreachable.
    fn walk_ancestors(&mut self, start: NodeId) -> (Reachability, Vec<NodeId>) {
        self.with_sweep(|g, mark| {
            let mut result = Reachability::default();
            let mut visited = vec![start];
            let mut stack = vec![start];
            g.mark(start, mark);
            while let Some(id) = stack.pop() {
                let holders: Vec<Holder> = g
                    .node(id)
                    .inbound
                    .iter()
                    .map(|&r| g.reference(r))
                    .filter(|r| r.structural)
                    .map(|r| r.holder)
                    .collect();
                for holder in holders {
                    if holder == Holder::Root {
                        result.reachable = true;
                        continue;
                    }
                    let Some(parent) = holder.parent() else { continue };
                    if parent == start {
                        result.cycle = true;
                    }
                    if !g.is_marked(parent, mark) {
                        g.mark(parent, mark);
                        visited.push(parent);
                        stack.push(parent);
                    }
                }
                if result.reachable {
                    break;
                }
            }
            (result, visited)
        })
    }

    /// Find the part of the graph below `start` that nothing outside it
    /// holds, and cut the structural edges between its members.
    ///
    /// A node below `start` survives when it has a structural holder
    /// outside the closure, or when a survivor holds it. Severed edges are
    /// unlinked without cascading; the caller disposes the region.
    pub(crate) fn rip_cycles(&mut self, start: NodeId) -> Vec<NodeId> {
        let mut below: HashSet<NodeId> = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if below.insert(id) {
                order.push(id);
                stack.extend(self.structural_targets(id));
            }
        }

        let mut alive: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = order
            .iter()
            .copied()
            .filter(|&id| self.held_from_outside(id, &below))
            .collect();
        while let Some(id) = stack.pop() {
            if alive.insert(id) {
                stack.extend(self.structural_targets(id).into_iter().filter(|t| below.contains(t)));
            }
        }

        let region: Vec<NodeId> = order.into_iter().filter(|id| !alive.contains(id)).collect();
        let members: HashSet<NodeId> = region.iter().copied().collect();
        for &id in &region {
            for edge in self.structural_edges(id) {
                if members.contains(&self.target(edge)) {
                    self.sever(edge);
                }
            }
        }
        region
    }

    /// Structural edges out of `node`: the proxy target, then the children.
    fn structural_edges(&self, node: NodeId) -> Vec<RefId> {
        self.proxy_ref(node)
            .into_iter()
            .chain(self.node(node).items.iter().map(|i| i.reference))
            .collect()
    }

    fn held_from_outside(&self, id: NodeId, closure: &HashSet<NodeId>) -> bool {
        self.node(id)
            .inbound
            .iter()
            .map(|&r| self.reference(r))
            .filter(|r| r.structural)
            .any(|r| r.holder.parent().is_none_or(|p| !closure.contains(&p)))
    }

    /// Drop a structural edge from its holder and unlink it, without
    /// releasing anything.
    pub(crate) fn sever(&mut self, edge: RefId) {
        match self.reference(edge).holder {
            Holder::Item { parent } => self.node_mut(parent).items.retain(|i| i.reference != edge),
            Holder::ProxyTarget { proxy } => self.node_mut(proxy).kind = NodeKind::Proxy { target: None },
            holder => panic!("severing non-structural holder {holder:?}"),
        }
        self.detach_reference(edge);
    }

    /// Settle a node that just lost a structural reference.
    pub(crate) fn converge(&mut self, node: NodeId) {
        let (reach, ancestors) = self.walk_ancestors(node);
        if reach.reachable {
            self.update_distance(node);
            return;
        }
        for &id in &ancestors {
            self.node_mut(id).root_distance = 0;
        }
        let region = self.rip_cycles(node);
        debug!(%node, cycle = reach.cycle, collected = region.len(), "collected unreachable region");
        for id in region {
            if self.try_node(id).is_some_and(|n| n.structural_count == 0) {
                self.dispose(id);
            }
        }
        if self.contains(node) && self.node(node).structural_count > 0 {
            for target in self.structural_targets(node) {
                self.update_distance(target);
            }
        }
    }
}
