//! Reference tracker: the only code that links and unlinks references.
//!
//! `remove_reference` is the single deletion choke point. Dropping the last
//! structural reference releases everything the node owns; dropping the
//! last reference of any kind deletes it; dropping a structural reference
//! while others survive hands the node to the cycle collector.

use tracing::trace;

use crate::model::*;
use super::Graph;

impl Graph {
    // ========================================================================
    // Creation
    // ========================================================================

    /// Allocate a node from its payload.
    pub fn create(&mut self, payload: Payload) -> NodeId {
        let (index, generation) = self.nodes.insert(Node::blank());
        let id = NodeId { index, generation };
        let kind = self.materialize(id, payload);
        let proxy_target = match kind {
            NodeKind::Proxy { target: Some(r) } => Some(self.target(r)),
            _ => None,
        };
        self.node_mut(id).kind = kind;
        if let Some(target) = proxy_target {
            self.update_distance(target);
        }
        trace!(%id, "created");
        id
    }

    /// Install the references a payload needs, held by `node`.
    fn materialize(&mut self, node: NodeId, payload: Payload) -> NodeKind {
        let operand = |slot| Holder::Operand { node, slot };
        match payload {
            Payload::Nul => NodeKind::Nul,
            Payload::Element { ty, value } => NodeKind::Element {
                ty: self.set_reference(ty, operand(Operand::Type), false, false),
                value,
            },
            Payload::TypeRange { lower, upper } => {
                assert!(lower <= upper, "type range <{lower}, {upper}> is inverted");
                NodeKind::TypeRange { lower, upper }
            }
            Payload::Proxy(target) => NodeKind::Proxy {
                target: target
                    .map(|t| self.set_reference(t, Holder::ProxyTarget { proxy: node }, true, false)),
            },
            Payload::Pattern { relation, source, destination, owner } => NodeKind::Pattern {
                relation: self.set_reference(relation, operand(Operand::Relation), false, false),
                source: self.set_reference(source, operand(Operand::Source), false, false),
                destination: self.set_reference(destination, operand(Operand::Destination), false, false),
                owner: self.set_reference(owner, operand(Operand::Owner), false, false),
            },
            Payload::Relation { relation, source, destination } => NodeKind::Relation {
                relation: self.set_reference(relation, operand(Operand::Relation), false, false),
                source: self.set_reference(source, operand(Operand::Source), false, false),
                destination: self.set_reference(destination, operand(Operand::Destination), false, false),
            },
            Payload::Code(i) => NodeKind::Code(i),
        }
    }

    /// Current payload of a node, expressed with handles.
    pub fn payload(&self, node: NodeId) -> Payload {
        match *self.node(node).kind() {
            NodeKind::Nul => Payload::Nul,
            NodeKind::Element { ty, value } => Payload::Element { ty: self.target(ty), value },
            NodeKind::TypeRange { lower, upper } => Payload::TypeRange { lower, upper },
            NodeKind::Proxy { target } => Payload::Proxy(target.map(|r| self.target(r))),
            NodeKind::Pattern { relation, source, destination, owner } => Payload::Pattern {
                relation: self.target(relation),
                source: self.target(source),
                destination: self.target(destination),
                owner: self.target(owner),
            },
            NodeKind::Relation { relation, source, destination } => Payload::Relation {
                relation: self.target(relation),
                source: self.target(source),
                destination: self.target(destination),
            },
            NodeKind::Code(i) => Payload::Code(i),
        }
    }

    /// Replace a node's variant in place. Children and relations stay.
    ///
    /// New references are installed before the old ones are released, so a
    /// target shared by both payloads never drops to zero in between.
    pub fn reshape(&mut self, node: NodeId, payload: Payload) {
        let new_kind = self.materialize(node, payload);
        let old_kind = std::mem::replace(&mut self.node_mut(node).kind, new_kind);
        for r in old_kind.operands() {
            self.remove_reference(r);
        }
        if let NodeKind::Proxy { target: Some(r) } = old_kind {
            self.remove_reference(r);
        }
        if let NodeKind::Proxy { target: Some(r) } = new_kind {
            if let Some(reference) = self.try_reference(r) {
                let target = reference.target;
                self.update_distance(target);
            }
        }
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Link a new reference record into `target`'s inbound list.
    ///
    /// # Panics
    ///
    /// When `target` is not live, or when `primary` is requested for a node
    /// that already has a primary owner.
    pub fn set_reference(&mut self, target: NodeId, holder: Holder, structural: bool, primary: bool) -> RefId {
        let node = self
            .try_node(target)
            .unwrap_or_else(|| panic!("reference to dead node {target}"));
        if primary {
            assert!(!node.has_primary, "node {target} already has a primary owner");
        }
        let (index, generation) = self.refs.insert(Reference { target, holder, structural, primary });
        let id = RefId { index, generation };
        let node = self.node_mut(target);
        node.inbound.push(id);
        if structural {
            node.structural_count += 1;
        }
        if primary {
            node.has_primary = true;
        }
        trace!(%id, %target, structural, primary, "reference set");
        id
    }

    /// Unlink a record and free it. Adjusts the counter only if the record
    /// is still structural; never cascades.
    pub(crate) fn detach_reference(&mut self, id: RefId) -> Reference {
        let reference = self
            .refs
            .remove(id.index, id.generation)
            .unwrap_or_else(|| panic!("removing reference {id} that was never set"));
        let node = self.node_mut(reference.target);
        if reference.structural {
            assert!(node.structural_count > 0, "structural reference count underflow on {}", reference.target);
            node.structural_count -= 1;
        }
        if reference.primary {
            node.has_primary = false;
        }
        if let Some(pos) = node.inbound.iter().position(|&r| r == id) {
            node.inbound.swap_remove(pos);
        }
        reference
    }

    /// Remove a reference with full ownership semantics.
    ///
    /// The caller must already have dropped the record from its holder
    /// (item list, proxy cell or operand slot).
    pub fn remove_reference(&mut self, id: RefId) {
        let reference = *self
            .try_reference(id)
            .unwrap_or_else(|| panic!("removing reference {id} that was never set"));
        let target = reference.target;

        if reference.structural {
            let record = self.reference_mut(id);
            record.structural = false;
            record.primary = false;
            let node = self.node_mut(target);
            assert!(node.structural_count > 0, "structural reference count underflow on {target}");
            node.structural_count -= 1;
            if reference.primary {
                node.has_primary = false;
            }
            if node.structural_count == 0 {
                // the record stays linked, so the cascade cannot delete `target`
                self.release_owned(target);
            }
        }

        let last = self.node(target).inbound.len() == 1;
        self.detach_reference(id);
        if last {
            self.delete_node(target);
        } else if reference.structural {
            self.converge(target);
        }
    }

    // ========================================================================
    // Release and deletion
    // ========================================================================

    /// Release everything a node owns: relations, children, proxy target.
    pub(crate) fn release_owned(&mut self, id: NodeId) {
        self.clear_relations(id);
        if !self.contains(id) {
            return;
        }
        self.clear(id);
        if !self.contains(id) {
            return;
        }
        if let NodeKind::Proxy { target: Some(r) } = self.node(id).kind {
            self.node_mut(id).kind = NodeKind::Proxy { target: None };
            self.remove_reference(r);
        }
    }

    /// Node without structural owners: release it, delete it if nothing at
    /// all refers to it any more.
    pub(crate) fn dispose(&mut self, id: NodeId) {
        self.release_owned(id);
        if self.try_node(id).is_some_and(|n| n.inbound.is_empty()) {
            self.delete_node(id);
        }
    }

    /// Free a node nothing refers to, releasing all of its outgoing references.
    pub(crate) fn delete_node(&mut self, id: NodeId) {
        debug_assert!(self.node(id).inbound.is_empty(), "deleting referenced node {id}");
        self.release_owned(id);
        if !self.contains(id) {
            return;
        }
        let kind = std::mem::replace(&mut self.node_mut(id).kind, NodeKind::Nul);
        for r in kind.operands() {
            self.remove_reference(r);
        }
        self.nodes.remove(id.index, id.generation);
        trace!(%id, "deleted");
    }
}
