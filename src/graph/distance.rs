//! Root-distance maintenance.

use std::collections::VecDeque;

use crate::model::*;
use super::Graph;

impl Graph {
    /// Recompute the root distance of `node` and propagate changes to its
    /// structural targets.
    ///
    /// A node's distance is one more than the nearest reachable structural
    /// parent, 1 for the node in the root slot, 0 when no parent is
    /// reachable. Values past the live node count can only come from a
    /// cycle feeding on itself and are clamped to 0.
    pub fn update_distance(&mut self, node: NodeId) {
        let limit = self.live_count() as u32;
        let mut queue = VecDeque::from([node]);
        while let Some(id) = queue.pop_front() {
            let Some(current) = self.try_node(id).map(|n| n.root_distance) else {
                continue;
            };
            let mut distance = self.computed_distance(id);
            if distance > limit {
                distance = 0;
            }
            if distance == current {
                continue;
            }
            self.node_mut(id).root_distance = distance;
            queue.extend(self.structural_targets(id));
        }
    }

    fn computed_distance(&self, id: NodeId) -> u32 {
        self.node(id)
            .inbound
            .iter()
            .map(|&r| self.reference(r))
            .filter(|r| r.structural)
            .filter_map(|r| match r.holder {
                Holder::Root => Some(1),
                holder => holder
                    .parent()
                    .filter(|&p| p != id)
                    .map(|p| self.node(p).root_distance)
                    .filter(|&d| d > 0)
                    .map(|d| d.saturating_add(1)),
            })
            .min()
            .unwrap_or(0)
    }

    /// Nodes this one holds structurally: its proxy target and its children.
    pub(crate) fn structural_targets(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.node(id);
        self.proxy_ref(id)
            .into_iter()
            .chain(node.items.iter().map(|i| i.reference))
            .map(|r| self.target(r))
            .collect()
    }
}
