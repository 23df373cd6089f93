//! Graph text AST.

use crate::model::{Instruction, ObjectPath};

/// A whole file: a list of labelled or unlabelled entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub entries: Vec<Entry>,
}

/// `label: node` or just `node`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub label: Option<String>,
    pub node: AstNode,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub head: Head,
    pub children: Vec<Entry>,
    pub hints: Vec<(String, String)>,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    /// `_`, or no head at all.
    Nul,
    /// `<lower, upper>`
    Range { lower: i64, upper: i64 },
    Code(Instruction),
    /// `$` with an optional inline target.
    Proxy(Option<Box<AstNode>>),
    /// `[relation, source, destination]` goes to the owner's relation
    /// list; with a fourth `owner` operand it is a pattern child.
    Relation {
        relation: PathRef,
        source: PathRef,
        destination: PathRef,
        owner: Option<PathRef>,
    },
    /// Bare path: the entry stands for an existing node.
    Reference(PathRef),
    /// `type[value]`
    Element { ty: PathRef, value: i64 },
}

/// A path together with where it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRef {
    pub path: ObjectPath,
    pub position: usize,
}

impl AstNode {
    pub fn nul(position: usize) -> Self {
        Self { head: Head::Nul, children: Vec::new(), hints: Vec::new(), position }
    }

    /// Relation-list entries are not items of the enclosing node.
    pub fn is_relation_entry(&self) -> bool {
        matches!(self.head, Head::Relation { owner: None, .. })
    }
}
