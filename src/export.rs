//! Text export: serialize a graph in the notation the loader reads.
//!
//! Every node is written once, at its canonical position: the first slot
//! that reaches it in a breadth-first walk from the root over items,
//! relation entries and proxy targets. Every other occurrence is an
//! absolute path. Unlabelled slots on the way to a referenced node get a
//! synthesized `K<n>K` label so the path can be written down.
//!
//! ```text
//! Graph → Layout (canonical slots, synthesized labels) → text
//!   → text::load_str / text::load_dir rebuilds an isomorphic graph
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::Path;

use hashbrown::{HashMap, HashSet};

use crate::graph::Graph;
use crate::model::*;
use crate::{Error, Result};

/// File holding a directory node's children that came from no other file.
pub const DIR_ROOT_FILE: &str = "root.hdb";

const INDENT: &str = "    ";

/// Write the whole graph as one document.
pub fn dump(graph: &Graph, writer: &mut dyn Write) -> Result<()> {
    let root = graph.root().ok_or_else(|| Error::Load("graph has no root".into()))?;
    let layout = Layout::new(graph, None);
    layout.node(writer, root, 0)?;
    writeln!(writer)?;
    Ok(())
}

pub fn dump_to_string(graph: &Graph) -> Result<String> {
    let mut buf = Vec::new();
    dump(graph, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write `node` and what it owns canonically as one document.
pub fn dump_subtree(graph: &Graph, node: NodeId, writer: &mut dyn Write) -> Result<()> {
    let layout = Layout::new(graph, Some(node));
    layout.node(writer, node, 0)?;
    writeln!(writer)?;
    Ok(())
}

/// Write the graph as a directory base.
///
/// Children hinted with a `filepath` inside the directory they sit in go
/// back to that file; plain directory nodes become subdirectories; the
/// rest goes to `root.hdb`.
pub fn dump_dir(graph: &Graph, dir: impl AsRef<Path>) -> Result<()> {
    let root = graph.root().ok_or_else(|| Error::Load("graph has no root".into()))?;
    let layout = Layout::new(graph, None);
    layout.directory(root, dir.as_ref(), "")
}

// ============================================================================
// Layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Item,
    Relation,
    Target,
}

/// Where a node is defined: the holder and the reference it is held by.
#[derive(Debug, Clone, Copy)]
struct Slot {
    parent: NodeId,
    via: RefId,
    kind: SlotKind,
}

struct Layout<'g> {
    graph: &'g Graph,
    root: Option<NodeId>,
    slots: HashMap<NodeId, Slot>,
    /// Labels invented for unlabelled slots, by slot reference.
    synthesized: HashMap<RefId, String>,
}

impl<'g> Layout<'g> {
    fn new(graph: &'g Graph, extra_top: Option<NodeId>) -> Self {
        let mut layout = Self {
            graph,
            root: graph.root(),
            slots: HashMap::new(),
            synthesized: HashMap::new(),
        };
        let mut order = Vec::new();
        if let Some(root) = layout.root {
            layout.place(root, &mut order);
        }
        if let Some(top) = extra_top.filter(|&t| Some(t) != layout.root && !layout.slots.contains_key(&t)) {
            layout.place(top, &mut order);
        }
        layout.synthesize(&order);
        layout
    }

    /// Breadth-first assignment of canonical slots below `top`.
    fn place(&mut self, top: NodeId, order: &mut Vec<NodeId>) {
        let g = self.graph;
        let mut queue = VecDeque::from([top]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let node = g.node(id);
            let target = g.proxy_ref(id).map(|r| (r, g.target(r), SlotKind::Target));
            let items = node.items().iter().map(|i| (i.reference, g.target(i.reference), SlotKind::Item));
            let relations = node
                .relations()
                .iter()
                .map(|i| (i.reference, g.target(i.reference), SlotKind::Relation));
            for (via, child, kind) in target.into_iter().chain(items).chain(relations) {
                if child == top || Some(child) == self.root || self.slots.contains_key(&child) {
                    continue;
                }
                if kind == SlotKind::Target && !self.inline_target(id, child) {
                    continue;
                }
                self.slots.insert(child, Slot { parent: id, via, kind });
                queue.push_back(child);
            }
        }
    }

    /// A proxy target can be written in place only when neither side
    /// needs a body the other would swallow.
    fn inline_target(&self, proxy: NodeId, target: NodeId) -> bool {
        let element = matches!(self.graph.node(target).kind(), NodeKind::Element { .. });
        !self.has_body(proxy) && !(element && self.has_body(target))
    }

    fn has_body(&self, id: NodeId) -> bool {
        let node = self.graph.node(id);
        !node.items().is_empty() || !node.relations().is_empty() || emitted_hints(node).next().is_some()
    }

    /// Give labels to the unlabelled slots on every referenced node's path.
    fn synthesize(&mut self, order: &[NodeId]) {
        let mut referenced = Vec::new();
        for &id in order {
            self.references_from(id, &mut referenced);
        }
        let mut seen = HashSet::new();
        let mut counter = 0usize;
        for node in referenced {
            if !seen.insert(node) {
                continue;
            }
            let mut cur = node;
            while let Some(slot) = self.slots.get(&cur).copied() {
                if slot.kind != SlotKind::Target
                    && self.graph_label(slot).is_none()
                    && !self.synthesized.contains_key(&slot.via)
                {
                    let label = loop {
                        let label = format!("K{counter}K");
                        counter += 1;
                        let parent = slot.parent;
                        if self.graph.find_by_label(parent, &label).is_none()
                            && self.graph.find_relation(parent, &label).is_none()
                        {
                            break label;
                        }
                    };
                    self.synthesized.insert(slot.via, label);
                }
                cur = slot.parent;
            }
        }
    }

    /// Nodes `id` will refer to by path.
    fn references_from(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let g = self.graph;
        let node = g.node(id);
        out.extend(node.kind().operands().into_iter().map(|r| g.target(r)));
        if let Some(r) = g.proxy_ref(id) {
            let target = g.target(r);
            if !self.is_canonical(target, r) {
                out.push(target);
            }
        }
        for item in node.items().iter().chain(node.relations()) {
            let target = g.target(item.reference);
            if !self.is_canonical(target, item.reference) {
                out.push(target);
            }
        }
    }

    fn is_canonical(&self, node: NodeId, via: RefId) -> bool {
        self.slots.get(&node).is_some_and(|s| s.via == via)
    }

    fn graph_label(&self, slot: Slot) -> Option<&'g str> {
        let node = self.graph.node(slot.parent);
        let list = match slot.kind {
            SlotKind::Item => node.items(),
            SlotKind::Relation => node.relations(),
            SlotKind::Target => return None,
        };
        list.iter().find(|i| i.reference == slot.via).and_then(|i| i.label.as_deref())
    }

    fn label(&self, kind: SlotKind, parent: NodeId, via: RefId) -> Option<&str> {
        self.graph_label(Slot { parent, via, kind })
            .or_else(|| self.synthesized.get(&via).map(String::as_str))
    }

    /// Absolute path of a node's canonical position.
    fn path(&self, node: NodeId) -> Result<ObjectPath> {
        let mut segments = Vec::new();
        let mut cur = node;
        while Some(cur) != self.root {
            let slot = self.slots.get(&cur).ok_or(Error::Unaddressable(node))?;
            let segment = match slot.kind {
                SlotKind::Target => PROXY_SEGMENT,
                kind => self.label(kind, slot.parent, slot.via).ok_or(Error::Unaddressable(node))?,
            };
            segments.push(segment.to_string());
            cur = slot.parent;
        }
        segments.reverse();
        Ok(ObjectPath::absolute(segments))
    }

    // ========================================================================
    // Text
    // ========================================================================

    fn node(&self, w: &mut dyn Write, id: NodeId, depth: usize) -> Result<()> {
        let g = self.graph;
        let node = g.node(id);
        let entries = self.entries(id);
        match *node.kind() {
            NodeKind::Nul => {
                if entries.is_empty() {
                    write!(w, "_")?;
                }
            }
            NodeKind::Element { ty, value } => write!(w, "{}[{value}]", self.path(g.target(ty))?)?,
            NodeKind::TypeRange { lower, upper } => write!(w, "<{lower}, {upper}>")?,
            NodeKind::Proxy { target } => {
                write!(w, "$")?;
                if let Some(r) = target {
                    write!(w, " ")?;
                    let target = g.target(r);
                    if self.is_canonical(target, r) {
                        // a bare `(` after `$` would open the proxy's own body
                        if matches!(g.node(target).kind(), NodeKind::Nul) && !self.entries(target).is_empty() {
                            write!(w, "_ ")?;
                        }
                        self.node(w, target, depth)?;
                    } else {
                        write!(w, "{}", self.path(target)?)?;
                    }
                }
            }
            NodeKind::Pattern { relation, source, destination, owner } => write!(
                w,
                "[{}, {}, {}, {}]",
                self.path(g.target(relation))?,
                self.path(g.target(source))?,
                self.path(g.target(destination))?,
                self.path(g.target(owner))?,
            )?,
            NodeKind::Relation { relation, source, destination } => write!(
                w,
                "[{}, {}, {}]",
                self.path(g.target(relation))?,
                self.path(g.target(source))?,
                self.path(g.target(destination))?,
            )?,
            NodeKind::Code(instruction) => write!(w, "{}", instruction.symbol())?,
        }

        if !entries.is_empty() {
            if !matches!(node.kind(), NodeKind::Nul) {
                write!(w, " ")?;
            }
            writeln!(w, "(")?;
            for (kind, via) in entries {
                write!(w, "{}", INDENT.repeat(depth + 1))?;
                self.entry(w, id, kind, via, depth + 1)?;
                writeln!(w, ",")?;
            }
            write!(w, "{})", INDENT.repeat(depth))?;
        }

        for (key, value) in emitted_hints(node) {
            write!(w, " #\"{}\":\"{}\"", escape(key), escape(value))?;
        }
        Ok(())
    }

    /// Items, then relation entries.
    fn entries(&self, id: NodeId) -> Vec<(SlotKind, RefId)> {
        let node = self.graph.node(id);
        node.items()
            .iter()
            .map(|i| (SlotKind::Item, i.reference))
            .chain(node.relations().iter().map(|i| (SlotKind::Relation, i.reference)))
            .collect()
    }

    fn entry(&self, w: &mut dyn Write, parent: NodeId, kind: SlotKind, via: RefId, depth: usize) -> Result<()> {
        if let Some(label) = self.label(kind, parent, via) {
            write!(w, "{label}: ")?;
        }
        let target = self.graph.target(via);
        if self.is_canonical(target, via) {
            self.node(w, target, depth)
        } else {
            write!(w, "{}", self.path(target)?)?;
            Ok(())
        }
    }

    // ========================================================================
    // Directories
    // ========================================================================

    fn directory(&self, id: NodeId, dir: &Path, relative: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut files: BTreeMap<String, Vec<(SlotKind, RefId)>> = BTreeMap::new();
        let mut subdirs = Vec::new();
        let fallback = format!("{relative}/{DIR_ROOT_FILE}");

        for (kind, via) in self.entries(id) {
            let target = self.graph.target(via);
            let canonical = self.is_canonical(target, via);
            let label = self.label(kind, id, via);
            if let Some(file) = self.graph.hint(target, HINT_FILEPATH).filter(|f| in_directory(f, relative)) {
                if canonical && self.graph.hint(target, HINT_BACKEND) == Some(HINT_BACKEND_FILE) {
                    files.entry(file.to_string()).or_default().push((kind, via));
                    continue;
                }
            }
            if let (SlotKind::Item, Some(label), true) = (kind, label, canonical) {
                let sub = format!("{relative}/{label}");
                if self.is_directory(target, &sub) {
                    subdirs.push((target, label.to_string(), sub));
                    continue;
                }
            }
            files.entry(fallback.clone()).or_default().push((kind, via));
        }

        let stamp = chrono::Utc::now().to_rfc3339();
        for (file, entries) in files {
            let name = file.rsplit('/').next().unwrap_or(DIR_ROOT_FILE);
            let mut buf = Vec::new();
            writeln!(buf, "// harmony-graph dump of {file}")?;
            writeln!(buf, "// Generated: {stamp}")?;
            for (kind, via) in entries {
                self.entry(&mut buf, id, kind, via, 0)?;
                writeln!(buf, ",")?;
            }
            fs::write(dir.join(name), buf)?;
        }
        for (node, label, sub) in subdirs {
            self.directory(node, &dir.join(label), &sub)?;
        }
        Ok(())
    }

    /// A plain node holding at least one child that came from a file in
    /// the directory `relative`.
    fn is_directory(&self, id: NodeId, relative: &str) -> bool {
        let g = self.graph;
        let node = g.node(id);
        matches!(node.kind(), NodeKind::Nul)
            && node.relations().is_empty()
            && node.hints.is_empty()
            && node.items().iter().any(|i| {
                g.hint(g.target(i.reference), HINT_FILEPATH)
                    .is_some_and(|f| in_directory(f, relative))
            })
    }
}

fn emitted_hints(node: &Node) -> impl Iterator<Item = (&str, &str)> {
    node.hints
        .iter()
        .filter(|(k, _)| k.as_str() != HINT_BACKEND && k.as_str() != HINT_FILEPATH)
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// `/a/b.hdb` sits in directory `/a`; the base directory itself is `""`.
fn in_directory(filepath: &str, relative: &str) -> bool {
    filepath
        .rsplit_once('/')
        .is_some_and(|(dir, name)| dir == relative && !name.is_empty() && name != DIR_ROOT_FILE)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}
