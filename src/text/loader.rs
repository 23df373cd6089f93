//! Build a graph from parsed text.
//!
//! Loading runs in two phases. The build phase creates one node per AST
//! node and attaches children as primary items; bare references become
//! `Nul` stubs and elements, patterns and relations become placeholders.
//! The resolve phase turns paths into nodes, gives placeholders their
//! payloads and replaces every stub by its target. For a directory all
//! files are built before anything is resolved, so files may refer to
//! each other freely.

use std::fs;
use std::path::Path;

use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::graph::Graph;
use crate::model::*;
use crate::{Error, Result};
use super::ast::*;
use super::parse;

/// Extension of graph text files inside a directory base.
pub const FILE_EXTENSION: &str = "hdb";

/// Load a document with a single root entry.
pub fn load_str(text: &str) -> Result<Graph> {
    let doc = parse(text)?;
    let [entry] = doc.entries.as_slice() else {
        return Err(Error::Load(format!("expected one root entry, found {}", doc.entries.len())));
    };
    let mut graph = Graph::new();
    let mut loader = Loader::new(&mut graph);
    let top = loader.build(entry, None)?;
    let root = loader.scopes[top].node;
    loader.graph.set_root(Some(root));
    loader.anchors.insert(top, root);
    loader.resolve_all()?;
    Ok(graph)
}

/// Load a single file; see [`load_str`].
pub fn load_file(path: impl AsRef<Path>) -> Result<Graph> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading file");
    let text = fs::read_to_string(path)?;
    load_str(&text)
}

/// Load a directory tree under a fresh root.
///
/// Entries of every `*.hdb` file become children of the node standing for
/// the file's directory, hinted with the file they came from.
/// Subdirectories become children labelled with their name.
pub fn load_dir(path: impl AsRef<Path>) -> Result<Graph> {
    let mut graph = Graph::with_root();
    let root = graph.root().ok_or_else(|| Error::Load("graph has no root".into()))?;
    let mut loader = Loader::new(&mut graph);
    loader.build_dir(path.as_ref(), root, "")?;
    loader.resolve_all()?;
    Ok(graph)
}

/// Load a file or a directory, whichever `path` is.
pub fn build_base(path: impl AsRef<Path>) -> Result<Graph> {
    let path = path.as_ref();
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        load_dir(path)
    } else if meta.is_file() {
        load_file(path)
    } else {
        Err(Error::Load(format!("{} is neither a file nor a directory", path.display())))
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Work left for the resolve phase.
#[derive(Debug, Clone)]
enum Pending {
    Nothing,
    Element { ty: PathRef, value: i64 },
    Pattern { relation: PathRef, source: PathRef, destination: PathRef, owner: PathRef },
    Relation { relation: PathRef, source: PathRef, destination: PathRef },
    Reference(PathRef),
}

/// One built AST node, with enough structure to resolve relative paths.
#[derive(Debug)]
struct Scope {
    node: NodeId,
    parent: Option<usize>,
    label: Option<String>,
    children: Vec<usize>,
    pending: Pending,
}

struct Loader<'g> {
    graph: &'g mut Graph,
    scopes: Vec<Scope>,
    /// Node a top-level scope was loaded into, for path fallback.
    anchors: HashMap<usize, NodeId>,
    /// Stubs already replaced, and by what.
    substituted: HashMap<NodeId, NodeId>,
}

impl<'g> Loader<'g> {
    fn new(graph: &'g mut Graph) -> Self {
        Self { graph, scopes: Vec::new(), anchors: HashMap::new(), substituted: HashMap::new() }
    }

    // ========================================================================
    // Build phase
    // ========================================================================

    fn build(&mut self, entry: &Entry, parent: Option<usize>) -> Result<usize> {
        self.build_node(&entry.node, parent, entry.label.as_deref())
    }

    fn build_node(&mut self, ast: &AstNode, parent: Option<usize>, label: Option<&str>) -> Result<usize> {
        let (payload, pending) = match &ast.head {
            Head::Nul => (Payload::Nul, Pending::Nothing),
            Head::Range { lower, upper } => (Payload::TypeRange { lower: *lower, upper: *upper }, Pending::Nothing),
            Head::Code(instruction) => (Payload::Code(*instruction), Pending::Nothing),
            Head::Proxy(_) => (Payload::Proxy(None), Pending::Nothing),
            Head::Element { ty, value } => (Payload::Nul, Pending::Element { ty: ty.clone(), value: *value }),
            Head::Relation { relation, source, destination, owner: Some(owner) } => (
                Payload::Nul,
                Pending::Pattern {
                    relation: relation.clone(),
                    source: source.clone(),
                    destination: destination.clone(),
                    owner: owner.clone(),
                },
            ),
            Head::Relation { relation, source, destination, owner: None } => (
                Payload::Nul,
                Pending::Relation {
                    relation: relation.clone(),
                    source: source.clone(),
                    destination: destination.clone(),
                },
            ),
            Head::Reference(path) => (Payload::Nul, Pending::Reference(path.clone())),
        };

        let node = self.graph.create(payload);
        for (key, value) in &ast.hints {
            self.graph.set_hint(node, key.as_str(), value.as_str());
        }
        let idx = self.scopes.len();
        self.scopes.push(Scope {
            node,
            parent,
            label: label.map(str::to_string),
            children: Vec::new(),
            pending,
        });

        if let Head::Proxy(Some(target)) = &ast.head {
            let t = self.build_node(target, Some(idx), None)?;
            let target = self.scopes[t].node;
            self.graph.link(node, Some(target));
        }

        for child in &ast.children {
            let c = self.build(child, Some(idx))?;
            self.attach(node, c, child)?;
            self.scopes[idx].children.push(c);
        }
        Ok(idx)
    }

    /// Hang a built child under `parent`: relation entries go to the
    /// relation list, everything else becomes a primary item.
    fn attach(&mut self, parent: NodeId, child: usize, entry: &Entry) -> Result<()> {
        let label = entry.label.as_deref();
        if let Some(label) = label {
            if self.graph.find_by_label(parent, label).is_some() || self.graph.find_relation(parent, label).is_some() {
                return Err(Error::DuplicateLabel { label: label.to_string(), position: entry.position });
            }
        }
        let node = self.scopes[child].node;
        if entry.node.is_relation_entry() {
            self.graph.add_relation(parent, node, label);
        } else {
            self.graph.add_child(parent, node, label, true);
        }
        Ok(())
    }

    fn build_dir(&mut self, dir: &Path, node: NodeId, relative: &str) -> Result<()> {
        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type()?.is_dir() {
                subdirs.push(name);
            } else if Path::new(&name).extension().is_some_and(|e| e == FILE_EXTENSION) {
                files.push(name);
            }
        }
        files.sort();
        subdirs.sort();

        for name in files {
            let filepath = format!("{relative}/{name}");
            debug!(%filepath, "loading file");
            let text = fs::read_to_string(dir.join(&name))?;
            let doc = parse(&text).map_err(|e| match e {
                Error::Syntax { position, message } => {
                    Error::Syntax { position, message: format!("{filepath}: {message}") }
                }
                other => other,
            })?;
            for entry in &doc.entries {
                let top = self.build(entry, None)?;
                self.attach(node, top, entry)?;
                let built = self.scopes[top].node;
                self.graph.set_hint(built, HINT_BACKEND, HINT_BACKEND_FILE);
                self.graph.set_hint(built, HINT_FILEPATH, filepath.as_str());
                self.anchors.insert(top, node);
            }
        }

        for name in subdirs {
            let child = match self.graph.find_by_label(node, &name) {
                Some(item) => self.graph.target(item),
                None if self.graph.find_relation(node, &name).is_some() => {
                    return Err(Error::DuplicateLabel { label: name, position: 0 });
                }
                None => {
                    let child = self.graph.create(Payload::Nul);
                    self.graph.add_child(node, child, Some(name.as_str()), true);
                    child
                }
            };
            self.build_dir(&dir.join(&name), child, &format!("{relative}/{name}"))?;
        }
        Ok(())
    }

    // ========================================================================
    // Resolve phase
    // ========================================================================

    fn resolve_all(&mut self) -> Result<()> {
        for idx in 0..self.scopes.len() {
            let pending = std::mem::replace(&mut self.scopes[idx].pending, Pending::Nothing);
            let node = self.scopes[idx].node;
            match pending {
                Pending::Nothing => {}
                Pending::Element { ty, value } => {
                    let ty = self.resolve(idx, &ty)?;
                    self.graph.reshape(node, Payload::Element { ty, value });
                }
                Pending::Pattern { relation, source, destination, owner } => {
                    let payload = Payload::Pattern {
                        relation: self.resolve(idx, &relation)?,
                        source: self.resolve(idx, &source)?,
                        destination: self.resolve(idx, &destination)?,
                        owner: self.resolve(idx, &owner)?,
                    };
                    self.graph.reshape(node, payload);
                }
                Pending::Relation { relation, source, destination } => {
                    let payload = Payload::Relation {
                        relation: self.resolve(idx, &relation)?,
                        source: self.resolve(idx, &source)?,
                        destination: self.resolve(idx, &destination)?,
                    };
                    self.graph.reshape(node, payload);
                }
                Pending::Reference(path) => {
                    let target = self.resolve(idx, &path)?;
                    if target == node {
                        return Err(Error::UnresolvedReference {
                            path: path.path.to_string(),
                            position: path.position,
                        });
                    }
                    trace!(stub = %node, %target, path = %path.path, "substituting");
                    self.graph.substitute_object(node, target);
                    self.substituted.insert(node, target);
                }
            }
        }
        Ok(())
    }

    /// Follow stub replacements to the live node.
    fn current(&self, mut node: NodeId) -> NodeId {
        while let Some(&next) = self.substituted.get(&node) {
            node = next;
        }
        node
    }

    fn resolve(&self, from: usize, r: &PathRef) -> Result<NodeId> {
        let found = if r.path.absolute {
            self.graph.object_by_path(&r.path, None)
        } else {
            self.resolve_relative(from, &r.path)
        };
        found
            .map(|n| self.current(n))
            .ok_or_else(|| Error::UnresolvedReference { path: r.path.to_string(), position: r.position })
    }

    /// Walk outward from `from`: at each scope try a child carrying the
    /// next segment, then the scope's own label. Whatever is left is
    /// looked up from the outermost scope, the load anchor and the root.
    fn resolve_relative(&self, from: usize, path: &ObjectPath) -> Option<NodeId> {
        let segments = &path.segments;
        let mut next = 0;
        let mut cursor = Some(from);
        let mut outermost = from;
        while let Some(s) = cursor {
            let scope = &self.scopes[s];
            let wanted = Some(segments[next].as_str());
            if let Some(&child) = scope.children.iter().find(|&&c| self.scopes[c].label.as_deref() == wanted) {
                next += 1;
                if next == segments.len() {
                    return Some(self.scopes[child].node);
                }
                cursor = Some(child);
                continue;
            }
            outermost = s;
            if scope.label.as_deref() == wanted {
                next += 1;
                if next == segments.len() {
                    return Some(scope.node);
                }
                continue;
            }
            cursor = scope.parent;
        }

        let start = self.current(self.scopes[outermost].node);
        self.graph
            .object_by_path(path, Some(start))
            .or_else(|| {
                let anchor = self.anchors.get(&outermost).map(|&a| self.current(a))?;
                self.graph.object_by_path(path, Some(anchor))
            })
            .or_else(|| self.graph.object_by_path(path, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(g: &Graph, path: &str) -> NodeId {
        g.object_by_path(&ObjectPath::parse(path).unwrap(), None)
            .unwrap_or_else(|| panic!("{path} not found"))
    }

    #[test]
    fn elements_take_their_type() {
        let g = load_str("(digit: <0, 9>, one: digit[1], box: (two: digit[2]))").unwrap();
        let digit = at(&g, ".digit");
        let two = at(&g, ".box.two");
        assert_eq!(g.payload(two), Payload::Element { ty: digit, value: 2 });
        assert_eq!(g.node(two).root_distance(), 3);
        g.verify().unwrap();
    }

    #[test]
    fn references_are_substituted() {
        let g = load_str("(a: (x: _), b: a.x, c: .a)").unwrap();
        let x = at(&g, ".a.x");
        assert_eq!(at(&g, ".b"), x);
        assert_eq!(at(&g, ".c"), at(&g, ".a"));
        assert_eq!(g.node(x).structural_count(), 2);
        assert!(g.node(x).has_primary());
        g.verify().unwrap();
    }

    #[test]
    fn forward_references_resolve() {
        let g = load_str("(one: t[1], t: digit, digit: <0, 1>)").unwrap();
        let digit = at(&g, ".digit");
        assert_eq!(at(&g, ".t"), digit);
        assert_eq!(g.payload(at(&g, ".one")), Payload::Element { ty: digit, value: 1 });
        g.verify().unwrap();
    }

    #[test]
    fn relative_paths_walk_outward() {
        let g = load_str("(k: <0, 1>, outer: (inner: (deep: k[0], self_ref: outer.inner)))").unwrap();
        let inner = at(&g, ".outer.inner");
        assert_eq!(at(&g, ".outer.inner.self_ref"), inner);
        let k = at(&g, ".k");
        assert_eq!(g.payload(at(&g, ".outer.inner.deep")), Payload::Element { ty: k, value: 0 });
    }

    #[test]
    fn proxies_relations_and_patterns() {
        let g = load_str(
            "(rel: (next: _), a: _, b: _, \
              p: $ b, q: $ _ (fresh: _), \
              ab: [rel.next, a, b], \
              pat: [rel.next, a, b, .])",
        )
        .unwrap();
        let root = g.root().unwrap();
        let (a, b, next) = (at(&g, ".a"), at(&g, ".b"), at(&g, ".rel.next"));
        assert_eq!(g.get_object(at(&g, ".p")), Some(b));
        assert!(g.object_by_path(&ObjectPath::absolute(["q", "$", "fresh"]), None).is_some());
        let relation = g.target(g.find_relation(root, "ab").unwrap());
        assert_eq!(g.payload(relation), Payload::Relation { relation: next, source: a, destination: b });
        assert_eq!(g.find_by_label(root, "ab"), None);
        assert_eq!(
            g.payload(at(&g, ".pat")),
            Payload::Pattern { relation: next, source: a, destination: b, owner: root }
        );
        g.verify().unwrap();
    }

    #[test]
    fn hints_are_kept() {
        let g = load_str(r#"(x: _ #"color":"red")"#).unwrap();
        assert_eq!(g.hint(at(&g, ".x"), "color"), Some("red"));
    }

    #[test]
    fn load_failures_are_values() {
        assert!(matches!(
            load_str("(a: nowhere)"),
            Err(Error::UnresolvedReference { ref path, position: 4 }) if path == "nowhere"
        ));
        assert!(matches!(
            load_str("(a: _, a: _)"),
            Err(Error::DuplicateLabel { ref label, position: 7 }) if label == "a"
        ));
        assert!(matches!(load_str("a: _, b: _"), Err(Error::Load(_))));
        assert!(matches!(load_str("(a: "), Err(Error::Syntax { .. })));
    }

    #[test]
    fn directory_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("types.hdb"), "digit: <0, 9>").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("nums.hdb"), "one: .digit[1], two: digit[2]").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let g = build_base(dir.path()).unwrap();
        let digit = at(&g, ".digit");
        assert_eq!(g.hint(digit, HINT_FILEPATH), Some("/types.hdb"));
        assert_eq!(g.hint(digit, HINT_BACKEND), Some(HINT_BACKEND_FILE));
        let two = at(&g, ".lib.two");
        assert_eq!(g.payload(two), Payload::Element { ty: digit, value: 2 });
        assert_eq!(g.hint(two, HINT_FILEPATH), Some("/lib/nums.hdb"));
        g.verify().unwrap();
    }

    #[test]
    fn subdirectory_clashing_with_relation_label() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.hdb"), "rel: (likes: _), a: _, b: _, lib: [rel.likes, a, b]").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("more.hdb"), "c: _").unwrap();

        match load_dir(dir.path()) {
            Err(Error::DuplicateLabel { label, .. }) => assert_eq!(label, "lib"),
            other => panic!("expected a duplicate label, got {other:?}"),
        }
    }
}
