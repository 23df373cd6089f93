//! Node store: children, relations, navigation and whole-node operations.

use tracing::trace;

use crate::model::*;
use super::Graph;

impl Graph {
    // ========================================================================
    // Children
    // ========================================================================

    /// Append `child` to `parent`'s items behind a structural reference.
    ///
    /// # Panics
    ///
    /// When `label` is already used by an item or relation of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId, label: Option<&str>, primary: bool) -> RefId {
        if let Some(label) = label {
            assert!(
                !self.label_in_use(parent, label),
                "duplicate label `{label}` under {parent}"
            );
        }
        let reference = self.set_reference(child, Holder::Item { parent }, true, primary);
        self.node_mut(parent).items.push(Item { label: label.map(str::to_string), reference });

        let parent_distance = self.node(parent).root_distance;
        let child_distance = self.node(child).root_distance;
        if parent_distance > 0 && (child_distance == 0 || child_distance > parent_distance + 1) {
            self.update_distance(child);
        }
        reference
    }

    /// Remove one item from its parent.
    ///
    /// # Panics
    ///
    /// When `item` is not a child slot.
    pub fn remove_child(&mut self, item: RefId) {
        let Holder::Item { parent } = self.reference(item).holder else {
            panic!("{item} is not a child slot");
        };
        let items = &mut self.node_mut(parent).items;
        let pos = items
            .iter()
            .position(|i| i.reference == item)
            .unwrap_or_else(|| panic!("{item} is not held by {parent}"));
        items.remove(pos);
        self.remove_reference(item);
    }

    /// Remove every child of `node`, last first.
    pub fn clear(&mut self, node: NodeId) {
        while let Some(item) = self.try_node(node).and_then(|n| n.items.last()).map(|i| i.reference) {
            self.remove_child(item);
        }
    }

    pub fn find_by_label(&self, parent: NodeId, label: &str) -> Option<RefId> {
        self.node(parent)
            .items
            .iter()
            .find(|i| i.label.as_deref() == Some(label))
            .map(|i| i.reference)
    }

    /// First item of `parent` whose target is `node`.
    pub fn find_by_node(&self, parent: NodeId, node: NodeId) -> Option<RefId> {
        self.node(parent)
            .items
            .iter()
            .find(|i| self.target(i.reference) == node)
            .map(|i| i.reference)
    }

    fn label_in_use(&self, parent: NodeId, label: &str) -> bool {
        let node = self.node(parent);
        node.items
            .iter()
            .chain(node.relations.iter())
            .any(|i| i.label.as_deref() == Some(label))
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Record `relation` in `owner`'s relation list. The entry does not
    /// keep the relation node alive structurally.
    pub fn add_relation(&mut self, owner: NodeId, relation: NodeId, label: Option<&str>) -> RefId {
        if let Some(label) = label {
            assert!(
                !self.label_in_use(owner, label),
                "duplicate label `{label}` under {owner}"
            );
        }
        let reference = self.set_reference(relation, Holder::RelationEntry { owner }, false, false);
        self.node_mut(owner).relations.push(Item { label: label.map(str::to_string), reference });
        reference
    }

    pub fn remove_relation(&mut self, entry: RefId) {
        let Holder::RelationEntry { owner } = self.reference(entry).holder else {
            panic!("{entry} is not a relation entry");
        };
        let relations = &mut self.node_mut(owner).relations;
        let pos = relations
            .iter()
            .position(|i| i.reference == entry)
            .unwrap_or_else(|| panic!("{entry} is not held by {owner}"));
        relations.remove(pos);
        self.remove_reference(entry);
    }

    pub fn clear_relations(&mut self, owner: NodeId) {
        while let Some(entry) = self.try_node(owner).and_then(|n| n.relations.last()).map(|i| i.reference) {
            self.remove_relation(entry);
        }
    }

    pub fn find_relation(&self, owner: NodeId, label: &str) -> Option<RefId> {
        self.node(owner)
            .relations
            .iter()
            .find(|i| i.label.as_deref() == Some(label))
            .map(|i| i.reference)
    }

    /// Relation nodes recorded on `owner`, in order.
    pub fn relations(&self, owner: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(owner).relations.iter().map(|i| self.target(i.reference))
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Children of `node` with their labels.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = (Option<&str>, NodeId)> + '_ {
        self.node(node)
            .items
            .iter()
            .map(|i| (i.label.as_deref(), self.target(i.reference)))
    }

    pub fn first(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).items.first().map(|i| self.target(i.reference))
    }

    pub fn last(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).items.last().map(|i| self.target(i.reference))
    }

    /// Sibling after the first occurrence of `node` in `parent`.
    pub fn next(&self, parent: NodeId, node: NodeId) -> Option<NodeId> {
        let items = &self.node(parent).items;
        let pos = items.iter().position(|i| self.target(i.reference) == node)?;
        items.get(pos + 1).map(|i| self.target(i.reference))
    }

    pub fn prev(&self, parent: NodeId, node: NodeId) -> Option<NodeId> {
        let items = &self.node(parent).items;
        let pos = items.iter().position(|i| self.target(i.reference) == node)?;
        pos.checked_sub(1).map(|p| self.target(items[p].reference))
    }

    /// Item following `item` in its parent.
    pub fn next_item(&self, item: RefId) -> Option<RefId> {
        let parent = self.item_parent(item)?;
        let items = &self.node(parent).items;
        let pos = items.iter().position(|i| i.reference == item)?;
        items.get(pos + 1).map(|i| i.reference)
    }

    /// Parent of a child slot.
    pub fn item_parent(&self, item: RefId) -> Option<NodeId> {
        match self.try_reference(item)?.holder {
            Holder::Item { parent } => Some(parent),
            _ => None,
        }
    }

    /// Label of a child slot or relation entry.
    pub fn label(&self, item: RefId) -> Option<&str> {
        let list = match self.try_reference(item)?.holder {
            Holder::Item { parent } => &self.node(parent).items,
            Holder::RelationEntry { owner } => &self.node(owner).relations,
            _ => return None,
        };
        list.iter().find(|i| i.reference == item)?.label.as_deref()
    }

    /// Label under which `parent` holds `node`.
    pub fn label_of(&self, parent: NodeId, node: NodeId) -> Option<&str> {
        self.label(self.find_by_node(parent, node)?)
    }

    /// Target reference of a linked proxy.
    pub fn proxy_ref(&self, node: NodeId) -> Option<RefId> {
        match self.node(node).kind {
            NodeKind::Proxy { target } => target,
            _ => None,
        }
    }

    /// Dereference a proxy; any other node stands for itself. An unlinked
    /// proxy yields `None`.
    pub fn get_object(&self, node: NodeId) -> Option<NodeId> {
        match self.node(node).kind {
            NodeKind::Proxy { target } => target.map(|r| self.target(r)),
            _ => Some(node),
        }
    }

    /// Resolve a label path. Relative paths start at `start`, or the root.
    ///
    /// `$` steps through a proxy. A relation label is accepted for the
    /// final segment when no child carries it.
    pub fn object_by_path(&self, path: &ObjectPath, start: Option<NodeId>) -> Option<NodeId> {
        let mut current = if path.absolute { self.root()? } else { start.or_else(|| self.root())? };
        let count = path.segments.len();
        for (n, segment) in path.segments.iter().enumerate() {
            current = if segment == PROXY_SEGMENT {
                self.target(self.proxy_ref(current)?)
            } else if let Some(item) = self.find_by_label(current, segment) {
                self.target(item)
            } else if n + 1 == count {
                self.target(self.find_relation(current, segment)?)
            } else {
                return None;
            };
        }
        Some(current)
    }

    // ========================================================================
    // Whole-node operations
    // ========================================================================

    /// Replace the designated root.
    pub fn set_root(&mut self, root: Option<NodeId>) {
        let old = self.root.take();
        if let Some(new) = root {
            let primary = !self.node(new).has_primary;
            self.root = Some(self.set_reference(new, Holder::Root, true, primary));
        }
        if let Some(old) = old {
            self.remove_reference(old);
        }
        if let Some(new) = root.filter(|&n| self.contains(n)) {
            self.update_distance(new);
        }
    }

    /// Move every reference to `old` onto `new`, then delete `old`.
    ///
    /// Structural counts transfer one to one; primary flags are demoted so
    /// that `new` keeps at most one primary owner.
    pub fn substitute_object(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let inbound = std::mem::take(&mut self.node_mut(old).inbound);
        let moved_structural = self.node(old).structural_count;
        {
            let node = self.node_mut(old);
            node.structural_count = 0;
            node.has_primary = false;
        }
        for &r in inbound.iter() {
            let reference = self.reference_mut(r);
            reference.target = new;
            reference.primary = false;
        }
        let node = self.node_mut(new);
        node.inbound.extend(inbound.iter().copied());
        node.structural_count += moved_structural;
        trace!(%old, %new, moved = inbound.len(), "substituted");
        self.delete_node(old);
        if self.contains(new) {
            self.update_distance(new);
        }
    }

    /// Point a proxy at `target`, or unlink it.
    pub fn link(&mut self, proxy: NodeId, target: Option<NodeId>) {
        assert!(self.node(proxy).is_proxy(), "linking non-proxy {proxy}");
        self.reshape(proxy, Payload::Proxy(target));
    }

    /// Give `dest` the payload of `src`, keeping its own children.
    pub fn copy_payload(&mut self, dest: NodeId, src: NodeId) {
        let payload = self.payload(src);
        self.reshape(dest, payload);
    }

    /// Identity, or equal content for elements and ranges.
    pub fn compare(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        match (self.node(a).kind(), self.node(b).kind()) {
            (NodeKind::Element { ty: ta, value: va }, NodeKind::Element { ty: tb, value: vb }) => {
                va == vb && self.target(*ta) == self.target(*tb)
            }
            (
                NodeKind::TypeRange { lower: la, upper: ua },
                NodeKind::TypeRange { lower: lb, upper: ub },
            ) => la == lb && ua == ub,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let a = g.create(Payload::Nul);
        let b = g.create(Payload::Nul);
        g.add_child(root, a, Some("a"), true);
        g.add_child(a, b, Some("b"), true);
        (g, root, a, b)
    }

    #[test]
    fn distances_follow_depth() {
        let (g, root, a, b) = tree();
        assert_eq!(
            [root, a, b].map(|n| g.node(n).root_distance()),
            [1, 2, 3]
        );
    }

    #[test]
    #[should_panic(expected = "duplicate label")]
    fn label_clash_with_relation_is_fatal() {
        let (mut g, root, a, b) = tree();
        let rel = g.create(Payload::Relation { relation: a, source: a, destination: b });
        g.add_relation(root, rel, Some("r"));
        g.add_child(root, b, Some("r"), false);
    }

    #[test]
    fn navigation() {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let ids: Vec<_> = (0..3).map(|_| g.create(Payload::Nul)).collect();
        for (n, &id) in ids.iter().enumerate() {
            g.add_child(root, id, Some(["x", "y", "z"][n]), true);
        }
        assert_eq!(g.first(root), Some(ids[0]));
        assert_eq!(g.last(root), Some(ids[2]));
        assert_eq!(g.next(root, ids[0]), Some(ids[1]));
        assert_eq!(g.prev(root, ids[0]), None);
        assert_eq!(g.prev(root, ids[2]), Some(ids[1]));
        assert_eq!(g.label_of(root, ids[1]), Some("y"));
        let labels: Vec<_> = g.children(root).map(|(l, _)| l).collect();
        assert_eq!(labels, vec![Some("x"), Some("y"), Some("z")]);
    }

    #[test]
    fn paths_through_proxies_and_relations() {
        let (mut g, root, a, b) = tree();
        let p = g.create(Payload::Proxy(Some(a)));
        g.add_child(root, p, Some("p"), true);
        let rel = g.create(Payload::Relation { relation: a, source: a, destination: b });
        g.add_relation(a, rel, Some("rel"));
        let path = |s| ObjectPath::parse(s).unwrap();
        assert_eq!(g.object_by_path(&path(".p.$.b"), None), Some(b));
        assert_eq!(g.object_by_path(&path(".a.rel"), None), Some(rel));
        assert_eq!(g.object_by_path(&path(".a.rel.x"), None), None);
        assert_eq!(g.object_by_path(&path("b"), Some(a)), Some(b));
        assert_eq!(g.object_by_path(&path("."), None), Some(root));
        g.verify().unwrap();
    }

    #[test]
    fn proxy_target_is_structural() {
        let (mut g, root, _, b) = tree();
        let p = g.create(Payload::Proxy(None));
        g.add_child(root, p, Some("p"), true);
        g.link(p, Some(b));
        assert_eq!(g.node(b).structural_count(), 2);
        assert_eq!(g.get_object(p), Some(b));
        g.link(p, None);
        assert_eq!(g.node(b).structural_count(), 1);
        assert_eq!(g.get_object(p), None);
        g.verify().unwrap();
    }

    #[test]
    fn substitute_moves_every_holder() {
        let (mut g, root, a, b) = tree();
        let stub = g.create(Payload::Nul);
        g.add_child(root, stub, Some("stub"), true);
        let p = g.create(Payload::Proxy(Some(stub)));
        g.add_child(a, p, Some("p"), true);
        let real = g.create(Payload::TypeRange { lower: 0, upper: 2 });
        g.substitute_object(stub, real);
        assert!(!g.contains(stub));
        assert_eq!(g.get_object(p), Some(real));
        assert_eq!(g.object_by_path(&ObjectPath::absolute(["stub"]), None), Some(real));
        assert_eq!(g.node(real).structural_count(), 2);
        assert_eq!(g.node(real).root_distance(), 2);
        assert!(!g.node(real).has_primary());
        assert!(g.contains(b));
        g.verify().unwrap();
    }

    #[test]
    fn compare_by_content() {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let t = g.create(Payload::TypeRange { lower: 0, upper: 9 });
        g.add_child(root, t, Some("t"), true);
        let e1 = g.create(Payload::Element { ty: t, value: 3 });
        let e2 = g.create(Payload::Element { ty: t, value: 3 });
        let e3 = g.create(Payload::Element { ty: t, value: 4 });
        for (l, e) in [("e1", e1), ("e2", e2), ("e3", e3)] {
            g.add_child(root, e, Some(l), true);
        }
        let t2 = g.create(Payload::TypeRange { lower: 0, upper: 9 });
        g.add_child(root, t2, Some("t2"), true);
        assert!(g.compare(e1, e2));
        assert!(!g.compare(e1, e3));
        assert!(g.compare(t, t2));
        assert!(!g.compare(root, t));
    }

    #[test]
    fn copy_payload_keeps_children() {
        let (mut g, root, a, b) = tree();
        let t = g.create(Payload::TypeRange { lower: 1, upper: 5 });
        g.add_child(root, t, Some("t"), true);
        g.copy_payload(a, t);
        assert_eq!(g.node(a).tag(), KindTag::TypeRange);
        assert_eq!(g.first(a), Some(b));
        g.verify().unwrap();
    }

    #[test]
    fn set_root_replaces_and_releases() {
        let (mut g, root, a, b) = tree();
        let fresh = g.create(Payload::Nul);
        g.set_root(Some(fresh));
        assert!(!g.contains(root));
        assert!(!g.contains(a));
        assert!(!g.contains(b));
        assert_eq!(g.root(), Some(fresh));
        assert_eq!(g.live_count(), 1);
        g.verify().unwrap();
    }
}
