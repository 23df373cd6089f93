//! Context cloner.
//!
//! An activation is a private copy of a `Launch` subgraph. Copying runs in
//! two passes: the clone pass builds the copy under one sweep, recording
//! every original in a clone map; the fill pass walks the copy under the
//! next sweep and decides which operands still point at originals. Those
//! rewrites remove references, so they are applied after the sweep ends.

use hashbrown::HashMap;
use tracing::debug;

use crate::graph::Graph;
use crate::model::*;

/// Registry of activations under the root.
pub const CONTEXT_REGISTRY: &str = "context";
/// Label of a cloned body inside its context.
pub const CONTEXT_ROOT: &str = "root";
pub const IP: &str = "ip";
pub const IP_STACK: &str = "ip_stack";
/// Argument label linked by identity instead of cloned.
pub const RETURN_SLOT: &str = "return";

type CloneMap = HashMap<NodeId, NodeId>;

/// Where a freshly cloned node gets attached.
#[derive(Debug, Clone, Copy)]
enum Attach<'a> {
    Detached,
    Item { parent: NodeId, label: Option<&'a str>, primary: bool },
    Proxy { proxy: NodeId },
}

struct CloneTask {
    source: NodeId,
    parent: NodeId,
    label: Option<String>,
    primary: bool,
    proxy_target: bool,
    shared: bool,
}

impl Graph {
    /// Registry node `root.context`, created on first use.
    pub fn context_registry(&mut self) -> NodeId {
        let root = self.root().unwrap_or_else(|| panic!("graph has no root"));
        if let Some(item) = self.find_by_label(root, CONTEXT_REGISTRY) {
            return self.target(item);
        }
        let registry = self.create(Payload::Nul);
        self.add_child(root, registry, Some(CONTEXT_REGISTRY), true);
        self.set_hint(registry, HINT_BACKEND, HINT_BACKEND_FILE);
        self.set_hint(registry, HINT_FILEPATH, "/context.hdb");
        registry
    }

    /// Create an activation.
    ///
    /// With a `Launch` source the body is cloned under the context as
    /// `root`, the argument is copied into its slots and an instruction
    /// pointer is installed. Without a source the context only links the
    /// graph root.
    pub fn create_context(
        &mut self,
        source: Option<NodeId>,
        name: Option<&str>,
        return_target: Option<NodeId>,
        argument: Option<NodeId>,
    ) -> NodeId {
        let registry = self.context_registry();
        let ctx = self.create(Payload::Nul);
        self.add_child(registry, ctx, name, true);

        let Some(source) = source else {
            let root = self.root();
            let proxy = self.create(Payload::Proxy(root));
            self.add_child(ctx, proxy, Some(CONTEXT_ROOT), true);
            debug!(%ctx, "created root context");
            return ctx;
        };

        let mut map = CloneMap::new();
        let clone = self.with_sweep(|g, _| {
            g.clone_node(source, Attach::Item { parent: ctx, label: Some(CONTEXT_ROOT), primary: true }, &mut map)
        });
        self.fill_cloned(clone, Some(ctx), &map);

        let slots: Vec<NodeId> = self.children(clone).map(|(_, n)| n).collect();
        let (named, unnamed, body) = match slots.as_slice() {
            [named, body] => (*named, None, *body),
            [named, unnamed, body, ..] => (*named, Some(*unnamed), *body),
            _ => panic!("launch {source} needs argument slots and a body"),
        };
        if argument.is_some() || return_target.is_some() {
            self.copy_argument(argument, named, unnamed, return_target);
        }

        let ip = self.create(Payload::Proxy(None));
        self.add_child(ctx, ip, Some(IP), true);
        let ip_stack = self.create(Payload::Nul);
        self.add_child(ctx, ip_stack, Some(IP_STACK), true);
        self.link(ip, Some(body));
        debug!(%ctx, %source, cloned = map.len(), "created context");
        ctx
    }

    // ========================================================================
    // Clone pass
    // ========================================================================

    /// Copy `source` and its structural closure. Runs inside a sweep.
    ///
    /// Nodes already cloned in this pass are linked again instead of
    /// copied, so internal sharing survives. The first operand of a `Send`
    /// is shared with the original unless it is a proxy.
    fn clone_node(&mut self, source: NodeId, attach: Attach<'_>, map: &mut CloneMap) -> NodeId {
        debug_assert!(self.is_sweeping(), "clone pass outside a sweep");
        let top = self.clone_one(source, attach, map);
        let mut stack = Vec::new();
        self.push_clone_tasks(source, top, &mut stack);
        while let Some(task) = stack.pop() {
            let attach = if task.proxy_target {
                Attach::Proxy { proxy: task.parent }
            } else {
                Attach::Item { parent: task.parent, label: task.label.as_deref(), primary: task.primary }
            };
            if task.shared {
                self.attach(task.source, attach);
                continue;
            }
            if let Some(&existing) = map.get(&task.source) {
                self.attach(existing, attach);
                continue;
            }
            let copy = self.clone_one(task.source, attach, map);
            self.push_clone_tasks(task.source, copy, &mut stack);
        }
        top
    }

    /// Copy one node's payload and relations, and attach the copy.
    fn clone_one(&mut self, source: NodeId, attach: Attach<'_>, map: &mut CloneMap) -> NodeId {
        let payload = match self.payload(source) {
            Payload::Proxy(_) => Payload::Proxy(None),
            other => other,
        };
        let copy = self.create(payload);
        map.insert(source, copy);
        self.attach(copy, attach);

        let relations: Vec<(Option<String>, NodeId)> = self
            .node(source)
            .relations()
            .iter()
            .map(|i| (i.label.clone(), self.target(i.reference)))
            .collect();
        for (label, relation) in relations {
            let payload = self.payload(relation);
            let cloned = self.create(payload);
            self.add_relation(copy, cloned, label.as_deref());
            map.insert(relation, cloned);
        }
        copy
    }

    fn push_clone_tasks(&self, source: NodeId, copy: NodeId, stack: &mut Vec<CloneTask>) {
        let is_send = self.node(source).instruction() == Some(Instruction::Send);
        let items: Vec<&Item> = self.node(source).items().iter().collect();
        for (n, item) in items.into_iter().enumerate().rev() {
            let child = self.target(item.reference);
            let shared = n == 0 && is_send && !self.node(child).is_proxy();
            stack.push(CloneTask {
                source: child,
                parent: copy,
                label: item.label.clone(),
                primary: !shared && self.reference(item.reference).primary,
                proxy_target: false,
                shared,
            });
        }
        if let Some(target) = self.proxy_ref(source).map(|r| self.target(r)) {
            stack.push(CloneTask {
                source: target,
                parent: copy,
                label: None,
                primary: false,
                proxy_target: true,
                shared: false,
            });
        }
    }

    fn attach(&mut self, node: NodeId, attach: Attach<'_>) {
        match attach {
            Attach::Detached => {}
            Attach::Item { parent, label, primary } => {
                let primary = primary && !self.node(node).has_primary();
                self.add_child(parent, node, label, primary);
            }
            Attach::Proxy { proxy } => self.link(proxy, Some(node)),
        }
    }

    // ========================================================================
    // Fill pass
    // ========================================================================

    /// Walk a fresh clone: stamp receivers with their context, propagate
    /// `parent_receiver`, flag loop markers and rewrite references that
    /// still point at cloned originals.
    fn fill_cloned(&mut self, clone: NodeId, context: Option<NodeId>, map: &CloneMap) {
        let rewrites = self.with_sweep(|g, mark| {
            let mut rewrites = Vec::new();
            let mut stack = vec![(clone, None::<NodeId>)];
            g.mark(clone, mark);
            while let Some((node, receiver)) = stack.pop() {
                g.fill_one(node, context, receiver, map, mark, &mut stack, &mut rewrites);
            }
            rewrites
        });
        // operands still naming cloned originals
        for node in rewrites {
            let payload = remap(self.payload(node), map);
            self.reshape(node, payload);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_one(
        &mut self,
        node: NodeId,
        context: Option<NodeId>,
        receiver: Option<NodeId>,
        map: &CloneMap,
        mark: u64,
        stack: &mut Vec<(NodeId, Option<NodeId>)>,
        rewrites: &mut Vec<NodeId>,
    ) {
        let instruction = self.node(node).instruction();
        if instruction == Some(Instruction::Receive) {
            if let Some(ctx) = context {
                self.exec_mut(node).context = Some(ctx);
            }
        }

        // cloned proxies are already linked to clones
        if let Some(target) = self.proxy_ref(node).map(|r| self.target(r)) {
            if !self.is_marked(target, mark) {
                self.mark(target, mark);
                stack.push((target, None));
            }
        }
        if self.refers_to_original(node, map) {
            rewrites.push(node);
        }
        let relations: Vec<NodeId> = self.relations(node).collect();
        for relation in relations {
            if self.refers_to_original(relation, map) {
                rewrites.push(relation);
            }
        }

        let below = if instruction == Some(Instruction::Receive) { Some(node) } else { receiver };
        let children: Vec<NodeId> = self.children(node).map(|(_, n)| n).collect();
        for (n, child) in children.into_iter().enumerate().rev() {
            let shared_operand = n == 0 && instruction == Some(Instruction::Send) && !self.node(child).is_proxy();
            if shared_operand {
                if self.node(child).tag() == KindTag::Nul {
                    self.exec_mut(child).loop_marker = true;
                }
                continue;
            }
            if let Some(r) = below {
                self.exec_mut(child).parent_receiver = Some(r);
            }
            if !self.is_marked(child, mark) {
                self.mark(child, mark);
                stack.push((child, below));
            } else if self.node(child).tag() == KindTag::Nul {
                self.exec_mut(child).loop_marker = true;
            }
        }
    }

    fn refers_to_original(&self, node: NodeId, map: &CloneMap) -> bool {
        matches!(self.node(node).tag(), KindTag::Pattern | KindTag::Relation)
            && self
                .node(node)
                .kind()
                .operands()
                .iter()
                .any(|&r| map.contains_key(&self.target(r)))
    }

    // ========================================================================
    // Arguments
    // ========================================================================

    /// Private copy of an argument. Type ranges are shared.
    pub fn clone_argument(&mut self, source: NodeId) -> NodeId {
        if self.node(source).tag() == KindTag::TypeRange {
            return source;
        }
        let mut map = CloneMap::new();
        let copy = self.with_sweep(|g, _| g.clone_node(source, Attach::Detached, &mut map));
        self.fill_cloned(copy, None, &map);
        copy
    }

    /// Deliver `source`'s children into a receiver's slots.
    ///
    /// A labelled argument matching a `named` slot is cloned into that
    /// proxy; `return` is linked as is. Everything else is cloned into
    /// `unnamed` when there is one and dropped otherwise.
    pub fn copy_argument(
        &mut self,
        source: Option<NodeId>,
        named: NodeId,
        unnamed: Option<NodeId>,
        return_target: Option<NodeId>,
    ) {
        let arguments: Vec<(Option<String>, NodeId)> = match source {
            Some(source) => self.children(source).map(|(l, n)| (l.map(str::to_string), n)).collect(),
            None => Vec::new(),
        };
        for (label, argument) in arguments {
            let slot = label
                .as_deref()
                .and_then(|l| self.find_by_label(named, l))
                .map(|item| self.target(item));
            let value = self.get_object(argument);
            match slot {
                Some(slot) => {
                    assert!(self.node(slot).is_proxy(), "argument slot {slot} is not a proxy");
                    let value = if label.as_deref() == Some(RETURN_SLOT) {
                        assert!(return_target.is_none(), "return slot supplied twice");
                        value
                    } else {
                        value.map(|v| self.clone_argument(v))
                    };
                    self.link(slot, value);
                }
                None => {
                    if let (Some(unnamed), Some(value)) = (unnamed, value) {
                        let copy = self.clone_argument(value);
                        let primary = !self.node(copy).has_primary();
                        self.add_child(unnamed, copy, label.as_deref(), primary);
                    }
                }
            }
        }
        if let Some(target) = return_target {
            let slot = self
                .find_by_label(named, RETURN_SLOT)
                .map(|item| self.target(item))
                .filter(|&s| self.node(s).is_proxy())
                .unwrap_or_else(|| panic!("{named} has no return slot"));
            self.link(slot, Some(target));
        }
    }

    /// Reset a receiver's slots before a new delivery cycle and arm it.
    ///
    /// Named proxies are unlinked; structured named slots are cleared
    /// recursively and each counts as one expected delivery.
    pub fn clear_arguments(&mut self, receiver: NodeId) {
        let slots: Vec<NodeId> = self.children(receiver).map(|(_, n)| n).collect();
        let mut structured = 0;
        if let Some(&named) = slots.first() {
            let named_slots: Vec<NodeId> = self.children(named).map(|(_, n)| n).collect();
            for slot in named_slots {
                if self.node(slot).is_proxy() {
                    self.link(slot, None);
                } else {
                    self.clear_slot(slot);
                    structured += 1;
                }
            }
        }
        if let Some(&unnamed) = slots.get(1) {
            self.clear(unnamed);
        }
        let exec = self.exec_mut(receiver);
        exec.armed = structured.max(1);
        exec.got = 0;
    }

    fn clear_slot(&mut self, slot: NodeId) {
        let mut stack = vec![slot];
        while let Some(node) = stack.pop() {
            let children: Vec<NodeId> = self.children(node).map(|(_, n)| n).collect();
            for child in children {
                if self.node(child).is_proxy() {
                    self.link(child, None);
                } else {
                    stack.push(child);
                }
            }
        }
    }
}

fn remap(payload: Payload, map: &CloneMap) -> Payload {
    let m = |n: NodeId| map.get(&n).copied().unwrap_or(n);
    match payload {
        Payload::Pattern { relation, source, destination, owner } => Payload::Pattern {
            relation: m(relation),
            source: m(source),
            destination: m(destination),
            owner: m(owner),
        },
        Payload::Relation { relation, source, destination } => Payload::Relation {
            relation: m(relation),
            source: m(source),
            destination: m(destination),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn clone_keeps_internal_sharing() {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let p = g.create(Payload::Nul);
        let q = g.create(Payload::Nul);
        let x = g.create(Payload::Nul);
        g.add_child(root, p, Some("p"), true);
        g.add_child(p, x, Some("x"), true);
        g.add_child(p, q, Some("q"), true);
        g.add_child(q, x, Some("x"), false);

        let copy = g.clone_argument(p);
        let cx = g.target(g.find_by_label(copy, "x").unwrap());
        let cq = g.target(g.find_by_label(copy, "q").unwrap());
        let cqx = g.target(g.find_by_label(cq, "x").unwrap());
        assert_ne!(cx, x);
        assert_eq!(cx, cqx);
        assert_eq!(g.node(cx).structural_count(), 2);
        g.add_child(root, copy, Some("copy"), true);
        assert_eq!(g.live_count(), 7);
        g.verify().unwrap();
    }

    #[test]
    fn clone_rewrites_pattern_operands() {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let body = g.create(Payload::Nul);
        g.add_child(root, body, Some("body"), true);
        let rel = g.create(Payload::Nul);
        g.add_child(root, rel, Some("rel"), true);
        let src = g.create(Payload::Nul);
        let dst = g.create(Payload::Proxy(None));
        g.add_child(body, src, Some("src"), true);
        g.add_child(body, dst, Some("dst"), true);
        let pat = g.create(Payload::Pattern { relation: rel, source: src, destination: dst, owner: body });
        g.add_child(body, pat, Some("pat"), true);

        let copy = g.clone_argument(body);
        let cpat = g.target(g.find_by_label(copy, "pat").unwrap());
        let csrc = g.target(g.find_by_label(copy, "src").unwrap());
        let cdst = g.target(g.find_by_label(copy, "dst").unwrap());
        assert_eq!(
            g.payload(cpat),
            Payload::Pattern { relation: rel, source: csrc, destination: cdst, owner: copy }
        );
        g.add_child(root, copy, Some("copy"), true);
        g.verify().unwrap();
    }

    #[test]
    fn send_recipient_is_shared_and_proxies_follow_clones() {
        let mut g = crate::text::load_str(
            "(
                sink: (slot: _),
                main: !(named: (), body: (>(sink, (v: _)), box: (inner: _), p: $ box)),
            )",
        )
        .unwrap();
        let at = |g: &Graph, path: &str| g.object_by_path(&ObjectPath::parse(path).unwrap(), None).unwrap();
        let (main, sink, original_box) = (at(&g, ".main"), at(&g, ".sink"), at(&g, ".main.body.box"));

        let ctx = g.create_context(Some(main), None, None, None);
        let body = g
            .object_by_path(&ObjectPath::relative([CONTEXT_ROOT, "body"]), Some(ctx))
            .unwrap();
        let send = g.first(body).unwrap();
        assert_eq!(g.first(send), Some(sink));
        assert!(g.exec(sink).loop_marker);

        let cbox = g.target(g.find_by_label(body, "box").unwrap());
        let cp = g.target(g.find_by_label(body, "p").unwrap());
        assert_ne!(cbox, original_box);
        assert_eq!(g.get_object(cp), Some(cbox));
        assert!(!g.exec(original_box).loop_marker);
        g.verify().unwrap();
    }

    #[test]
    fn type_ranges_are_shared_arguments() {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let t = g.create(Payload::TypeRange { lower: 0, upper: 3 });
        g.add_child(root, t, Some("t"), true);
        assert_eq!(g.clone_argument(t), t);
    }

    #[test]
    fn clear_arguments_arms_per_structured_slot() {
        let mut g = Graph::with_root();
        let root = g.root().unwrap();
        let receiver = g.create(Payload::Code(Instruction::Receive));
        g.add_child(root, receiver, Some("r"), true);
        let named = g.create(Payload::Nul);
        let unnamed = g.create(Payload::Nul);
        g.add_child(receiver, named, Some("named"), true);
        g.add_child(receiver, unnamed, Some("unnamed"), true);
        for label in ["a", "b"] {
            let slot = g.create(Payload::Nul);
            g.add_child(named, slot, Some(label), true);
            let inner = g.create(Payload::Proxy(Some(root)));
            g.add_child(slot, inner, Some("v"), true);
        }
        let plain = g.create(Payload::Proxy(Some(root)));
        g.add_child(named, plain, Some("p"), true);
        let junk = g.create(Payload::Nul);
        g.add_child(unnamed, junk, None, true);

        g.clear_arguments(receiver);
        assert_eq!(g.exec(receiver).armed, 2);
        assert_eq!(g.exec(receiver).got, 0);
        assert_eq!(g.get_object(plain), None);
        assert!(g.node(unnamed).is_empty());
        let a = g.object_by_path(&ObjectPath::absolute(["r", "named", "a", "v"]), None).unwrap();
        assert_eq!(g.get_object(a), None);
        g.verify().unwrap();
    }
}
