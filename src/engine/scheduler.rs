//! Instruction dispatch and the per-context state machine.

use smallvec::SmallVec;
use serde::Serialize;
use tracing::{debug, trace};

use crate::model::*;
use super::context::{IP, IP_STACK, RETURN_SLOT};
use super::Engine;

/// Scheduler state of the running context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Execute the node under `ip`.
    Dispatch,
    /// Move `ip` to the next instruction.
    Advance,
    /// Park the context in the wait queue.
    Suspend,
    /// Finish the context.
    Terminate,
}

/// Counters for one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub steps: u64,
    pub suspended: u64,
    pub terminated: u64,
    /// The run stopped on the step budget with work left.
    pub budget_exhausted: bool,
}

/// The running context's instruction pointer and frame stack.
#[derive(Debug, Clone, Copy)]
struct Activation {
    ctx: NodeId,
    ip: NodeId,
    stack: NodeId,
}

impl Engine {
    /// Run queued contexts until the run queue drains or the step budget
    /// runs out.
    pub fn run(&mut self) -> RunStats {
        let mut stats = RunStats::default();
        while let Some(&ctx) = self.run_queue.front() {
            let Some(act) = self.activation(ctx) else {
                self.run_queue.pop_front();
                continue;
            };
            trace!(%ctx, run = self.run_queue.len(), wait = self.wait_queue.len(), "scheduling");
            let mut step = Step::Dispatch;
            loop {
                step = match step {
                    Step::Dispatch => {
                        if self.config.max_steps.is_some_and(|max| stats.steps >= max) {
                            stats.budget_exhausted = true;
                            return stats;
                        }
                        stats.steps += 1;
                        self.dispatch(act)
                    }
                    Step::Advance => self.advance(act),
                    Step::Suspend => {
                        self.run_queue.pop_front();
                        self.wait_queue.push_back(ctx);
                        stats.suspended += 1;
                        break;
                    }
                    Step::Terminate => {
                        self.run_queue.pop_front();
                        self.retire(ctx);
                        stats.terminated += 1;
                        break;
                    }
                };
            }
        }
        stats
    }

    fn activation(&self, ctx: NodeId) -> Option<Activation> {
        let graph = &self.graph;
        if !graph.contains(ctx) {
            return None;
        }
        let ip = graph.target(graph.find_by_label(ctx, IP)?);
        let stack = graph.target(graph.find_by_label(ctx, IP_STACK)?);
        Some(Activation { ctx, ip, stack })
    }

    /// Operands of an instruction: its children, undereferenced.
    fn operands(&self, node: NodeId) -> Vec<NodeId> {
        self.graph.children(node).map(|(_, n)| n).collect()
    }

    fn resolve(&self, node: NodeId) -> Option<NodeId> {
        self.graph.get_object(node)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(&mut self, act: Activation) -> Step {
        let Some(current) = self.resolve(act.ip) else {
            return Step::Terminate;
        };
        if self.config.trace_steps {
            debug!(ctx = %act.ctx, %current, kind = ?self.graph.node(current).tag(), "step");
        }
        match *self.graph.node(current).kind() {
            NodeKind::Code(instruction) => self.execute(act, current, instruction),
            NodeKind::Proxy { .. } => Step::Advance,
            NodeKind::Element { value: -1, .. } if self.config.dump_on_sentinel => {
                self.dump();
                Step::Advance
            }
            _ => {
                if self.push_frame(act, current) {
                    Step::Dispatch
                } else {
                    Step::Advance
                }
            }
        }
    }

    fn execute(&mut self, act: Activation, current: NodeId, instruction: Instruction) -> Step {
        let ops = self.operands(current);
        match instruction {
            Instruction::Match => {
                let [patterns, unknowns, negatives] = [0, 1, 2].map(|n| {
                    ops.get(n)
                        .and_then(|&o| self.resolve(o))
                        .unwrap_or_else(|| panic!("match {current} needs patterns, unknowns and negatives"))
                });
                let intrinsics = self.intrinsics;
                let matched = self.graph.match_pattern(&intrinsics, patterns, unknowns, negatives);
                let continuation = ops.get(3).and_then(|&c| self.resolve(c));
                trace!(%current, matched, "match");
                match continuation {
                    None if !matched => panic!("MATCH NOT MET at {current}"),
                    Some(cont) if matched && !self.graph.node(cont).is_empty() => {
                        self.push_frame(act, current);
                        self.push_frame(act, cont);
                        Step::Dispatch
                    }
                    _ => Step::Advance,
                }
            }
            Instruction::Create => {
                let dest = self.proxy_operand(current, &ops, 0);
                let fresh = self.graph.create(Payload::Nul);
                self.graph.link(dest, Some(fresh));
                Step::Advance
            }
            Instruction::Assign => {
                let dest = self.proxy_operand(current, &ops, 0);
                let dest = self
                    .resolve(dest)
                    .unwrap_or_else(|| panic!("assign {current} through an unlinked proxy"));
                let src = ops
                    .get(1)
                    .and_then(|&s| self.resolve(s))
                    .unwrap_or_else(|| panic!("assign {current} has no source"));
                self.graph.copy_payload(dest, src);
                Step::Advance
            }
            Instruction::Add | Instruction::Remove => {
                let [set, object] = [0, 1].map(|n| {
                    ops.get(n)
                        .and_then(|&o| self.resolve(o))
                        .unwrap_or_else(|| panic!("{instruction:?} {current} needs a set and an object"))
                });
                if instruction == Instruction::Add {
                    self.graph.add_child(set, object, None, false);
                } else if let Some(item) = self.graph.find_by_node(set, object) {
                    self.graph.remove_child(item);
                }
                Step::Advance
            }
            Instruction::Receive => {
                let exec = self.graph.exec(current);
                trace!(%current, armed = exec.armed, got = exec.got, "receive");
                if exec.armed == 0 {
                    self.graph.clear_arguments(current);
                    Step::Suspend
                } else if exec.got < exec.armed {
                    Step::Suspend
                } else {
                    let exec = self.graph.exec_mut(current);
                    exec.armed = 0;
                    exec.got = 0;
                    Step::Advance
                }
            }
            Instruction::Send => self.send(current, &ops),
            Instruction::Link => {
                let proxy = ops
                    .first()
                    .copied()
                    .unwrap_or_else(|| panic!("link {current} has no proxy operand"));
                if self.graph.node(proxy).is_proxy() {
                    let target = ops.get(1).and_then(|&t| self.resolve(t));
                    self.graph.link(proxy, target);
                }
                Step::Advance
            }
            Instruction::Launch | Instruction::Relate => Step::Advance,
        }
    }

    fn proxy_operand(&self, current: NodeId, ops: &[NodeId], n: usize) -> NodeId {
        ops.get(n)
            .copied()
            .filter(|&p| self.graph.node(p).is_proxy())
            .unwrap_or_else(|| panic!("{current}: operand {n} must be a proxy"))
    }

    fn send(&mut self, current: NodeId, ops: &[NodeId]) -> Step {
        let Some(receiver) = ops.first().and_then(|&r| self.resolve(r)) else {
            return Step::Terminate;
        };
        let argument = ops.get(1).and_then(|&a| self.resolve(a));
        let require_argument =
            || argument.unwrap_or_else(|| panic!("send {current} to {receiver} without an argument"));

        match self.graph.node(receiver).instruction() {
            Some(Instruction::Launch) => {
                let argument = require_argument();
                let slot = self
                    .graph
                    .find_by_label(argument, RETURN_SLOT)
                    .unwrap_or_else(|| panic!("launch argument {argument} has no return slot"));
                let return_target = self.resolve(self.graph.target(slot));
                if return_target.is_some() {
                    let ctx = self.graph.create_context(Some(receiver), None, None, Some(argument));
                    debug!(%receiver, %ctx, "launched");
                    self.run_queue.push_back(ctx);
                }
            }
            Some(Instruction::Receive) => {
                let argument = require_argument();
                let slots: SmallVec<[NodeId; 2]> =
                    self.graph.children(receiver).map(|(_, n)| n).take(2).collect();
                let named = *slots
                    .first()
                    .unwrap_or_else(|| panic!("receiver {receiver} has no named slot"));
                let unnamed = slots.get(1).copied();
                self.graph.copy_argument(Some(argument), named, unnamed, None);
                self.graph.exec_mut(receiver).got = 1;
                if let Some(ctx) = self.graph.exec(receiver).context {
                    self.wake(ctx);
                }
            }
            _ => {
                let Some(parent) = self
                    .graph
                    .exec(receiver)
                    .parent_receiver
                    .filter(|&p| self.graph.contains(p))
                else {
                    self.dump();
                    panic!("send {current} to {receiver}, which is not a receiver");
                };
                let argument = require_argument();
                let exec = self.graph.exec(parent);
                assert!(exec.armed > 0, "delivery to unarmed receiver {parent}");
                assert!(exec.got < exec.armed, "receiver {parent} already has {} deliveries", exec.got);
                self.graph.copy_argument(Some(argument), receiver, None, None);
                let exec = self.graph.exec_mut(parent);
                exec.got += 1;
                let (got, armed, ctx) = (exec.got, exec.armed, exec.context);
                trace!(%parent, got, armed, "partial delivery");
                if got == armed {
                    if let Some(ctx) = ctx {
                        self.wake(ctx);
                    }
                }
            }
        }
        Step::Advance
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Step into a compound node. Returns false for an empty one.
    ///
    /// A loop-flagged frame that is already on the stack discards the
    /// frames above it instead of being pushed again.
    fn push_frame(&mut self, act: Activation, frame: NodeId) -> bool {
        let Some(first) = self.graph.first(frame) else {
            return false;
        };
        if !(self.graph.exec(frame).loop_marker && self.collapse_to(act, frame)) {
            self.graph.add_child(act.stack, frame, None, false);
        }
        self.graph.link(act.ip, Some(first));
        true
    }

    /// Drop every frame above `frame`. False when `frame` is not on the stack.
    fn collapse_to(&mut self, act: Activation, frame: NodeId) -> bool {
        let Some(pos) = self.graph.children(act.stack).position(|(_, n)| n == frame) else {
            return false;
        };
        while self.graph.node(act.stack).items().len() > pos + 1 {
            self.pop_frame(act);
        }
        true
    }

    fn pop_frame(&mut self, act: Activation) {
        if let Some(item) = self.graph.node(act.stack).items().last().map(|i| i.reference) {
            self.graph.remove_child(item);
        }
    }

    fn advance(&mut self, act: Activation) -> Step {
        let Some(mut current) = self.resolve(act.ip) else {
            return Step::Terminate;
        };
        loop {
            let Some(frame) = self.graph.last(act.stack) else {
                return Step::Terminate;
            };
            match self.graph.next(frame, current) {
                Some(next) => {
                    let looped = self.graph.exec(next).loop_marker && self.collapse_to(act, next);
                    let target = match self.graph.first(next) {
                        Some(first) if looped => first,
                        _ => next,
                    };
                    self.graph.link(act.ip, Some(target));
                    return Step::Dispatch;
                }
                None => {
                    current = frame;
                    self.pop_frame(act);
                }
            }
        }
    }
}
