//! Pattern matcher for `Match`.
//!
//! Every pattern computes whether its relation holds and, if it does, the
//! value it relates the source to. The destination then decides:
//! a negative destination requires the relation not to hold, a free
//! unknown proxy is bound to the value, anything else must compare equal
//! to it. The match is the conjunction over the pattern list.

use tracing::trace;

use crate::graph::Graph;
use crate::model::*;
use super::Intrinsics;

/// What a relation relates the source to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Node(NodeId),
    /// Element of `ty` that may not exist in the graph yet.
    Computed { ty: NodeId, value: i64 },
    /// Relation that only holds or does not (identity).
    Truth,
}

#[derive(Debug, Clone, Copy)]
struct Query {
    relation: NodeId,
    source: Option<NodeId>,
    destination: NodeId,
    owner: Option<NodeId>,
}

impl Graph {
    /// Run a pattern list. `unknowns` and `negatives` list the destination
    /// nodes to treat as outputs and as must-fail constraints.
    pub fn match_pattern(
        &mut self,
        intrinsics: &Intrinsics,
        patterns: NodeId,
        unknowns: NodeId,
        negatives: NodeId,
    ) -> bool {
        let unknown: Vec<NodeId> = self.children(unknowns).map(|(_, n)| n).collect();
        let negative: Vec<NodeId> = self.children(negatives).map(|(_, n)| n).collect();
        for &u in &unknown {
            self.exec_mut(u).unknown = true;
            if self.node(u).is_proxy() {
                self.link(u, None);
            }
        }
        for &n in &negative {
            self.exec_mut(n).negative = true;
        }

        let entries: Vec<NodeId> = self.children(patterns).map(|(_, n)| n).collect();
        let mut matched = true;
        for entry in entries {
            let Some(pattern) = self.get_object(entry) else { continue };
            let NodeKind::Pattern { relation, source, destination, owner } = *self.node(pattern).kind() else {
                continue;
            };
            let query = Query {
                relation: self.target(relation),
                source: self.get_object(self.target(source)),
                destination: self.target(destination),
                owner: self.get_object(self.target(owner)),
            };
            if !self.match_one(intrinsics, query) {
                trace!(%pattern, "pattern failed");
                matched = false;
                break;
            }
        }

        for &u in &unknown {
            if self.contains(u) {
                self.exec_mut(u).unknown = false;
            }
        }
        for &n in &negative {
            if self.contains(n) {
                self.exec_mut(n).negative = false;
            }
        }
        matched
    }

    fn match_one(&mut self, intrinsics: &Intrinsics, q: Query) -> bool {
        let holds = self.evaluate(intrinsics, q);
        let dest = q.destination;
        let exec = self.exec(dest);
        if exec.negative {
            return holds.is_none();
        }
        let Some(value) = holds else { return false };
        let free_unknown = exec.unknown && self.node(dest).is_proxy() && self.proxy_ref(dest).is_none();
        match value {
            Value::Truth => true,
            Value::Node(node) if free_unknown => {
                self.link(dest, Some(node));
                true
            }
            Value::Computed { ty, value } if free_unknown => {
                let element = self.create(Payload::Element { ty, value });
                self.link(dest, Some(element));
                true
            }
            Value::Node(node) => self.get_object(dest).is_some_and(|d| self.compare(d, node)),
            Value::Computed { ty, value } => self.get_object(dest).is_some_and(|d| {
                matches!(*self.node(d).kind(), NodeKind::Element { ty: t, value: v } if v == value && self.target(t) == ty)
            }),
        }
    }

    /// Does the relation hold, and what does it relate the source to.
    fn evaluate(&self, intrinsics: &Intrinsics, q: Query) -> Option<Value> {
        let src = q.source?;
        let owner = q.owner;
        let r = q.relation;

        if r == intrinsics.ty {
            return match *self.node(src).kind() {
                NodeKind::Element { ty, .. } => Some(Value::Node(self.target(ty))),
                _ => None,
            };
        }
        if r == intrinsics.prev || r == intrinsics.next {
            let owner = owner?;
            let step = if r == intrinsics.next { 1 } else { -1 };
            if let Some((value, lower, upper)) = self.element_of_range(src, owner) {
                let value = value.checked_add(step)?;
                return (lower..=upper)
                    .contains(&value)
                    .then_some(Value::Computed { ty: owner, value });
            }
            let sibling = if step > 0 { self.next(owner, src) } else { self.prev(owner, src) };
            return sibling.and_then(|s| self.get_object(s)).map(Value::Node);
        }
        if r == intrinsics.first || r == intrinsics.last {
            let owner = owner?;
            let first = r == intrinsics.first;
            if let NodeKind::TypeRange { lower, upper } = *self.node(owner).kind() {
                let value = if first { lower } else { upper };
                return Some(Value::Computed { ty: owner, value });
            }
            if src != owner {
                return None;
            }
            let end = if first { self.first(owner) } else { self.last(owner) };
            return end.and_then(|e| self.get_object(e)).map(Value::Node);
        }
        if r == intrinsics.me {
            let dest = self.get_object(q.destination)?;
            let same = match (self.node(src).kind(), self.node(dest).kind()) {
                (NodeKind::Element { .. }, NodeKind::Element { .. }) => self.compare(src, dest),
                (NodeKind::TypeRange { .. }, NodeKind::TypeRange { .. }) => src == dest,
                _ => false,
            };
            return same.then_some(Value::Truth);
        }

        let owner = owner?;
        let relation = self.get_object(r)?;
        let bound = (!self.exec(q.destination).unknown)
            .then(|| self.get_object(q.destination))
            .flatten();
        self.relations(owner).find_map(|entry| {
            let NodeKind::Relation { relation: rr, source: rs, destination: rd } = *self.node(entry).kind() else {
                return None;
            };
            let destination = self.target(rd);
            let hit = self.target(rr) == relation
                && self.compare(self.target(rs), src)
                && bound.is_none_or(|b| self.compare(destination, b));
            hit.then_some(Value::Node(destination))
        })
    }

    /// `(value, lower, upper)` when `src` is an element typed by the range `owner`.
    fn element_of_range(&self, src: NodeId, owner: NodeId) -> Option<(i64, i64, i64)> {
        let NodeKind::Element { ty, value } = *self.node(src).kind() else { return None };
        let NodeKind::TypeRange { lower, upper } = *self.node(owner).kind() else { return None };
        (self.target(ty) == owner).then_some((value, lower, upper))
    }
}
