//! Interactive console over a shared runtime.
//!
//! The console keeps a current position (a stack of child slots from the
//! root) and a shell context `root.context.shell` whose `receiver` collects
//! replies to messages sent from the prompt.

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::graph::Graph;
use crate::model::*;
use crate::shared::SharedRuntime;
use crate::{export, Result};

pub const SHELL_CONTEXT: &str = "shell";
pub const SHELL_RECEIVER: &str = "receiver";

/// Whether the console keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    runtime: SharedRuntime,
    /// Items walked from the root to the current node.
    path: Vec<RefId>,
    receiver: NodeId,
}

impl Console {
    /// Attach to a runtime, creating the shell context and its receiver
    /// when the graph does not have them yet.
    pub fn new(runtime: SharedRuntime) -> Self {
        let receiver = runtime.with(|engine| {
            let graph = engine.graph_mut();
            let registry = graph.context_registry();
            let shell = match graph.find_by_label(registry, SHELL_CONTEXT) {
                Some(item) => graph.target(item),
                None => graph.create_context(None, Some(SHELL_CONTEXT), None, None),
            };
            match graph.find_by_label(shell, SHELL_RECEIVER) {
                Some(item) => graph.target(item),
                None => {
                    let receiver = graph.create(Payload::Code(Instruction::Receive));
                    graph.add_child(shell, receiver, Some(SHELL_RECEIVER), true);
                    for slot in ["named", "unnamed"] {
                        let node = graph.create(Payload::Nul);
                        graph.add_child(receiver, node, Some(slot), true);
                    }
                    receiver
                }
            }
        });
        debug!(%receiver, "console attached");
        Self { runtime, path: Vec::new(), receiver }
    }

    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    /// The shell's reply receiver.
    pub fn receiver(&self) -> NodeId {
        self.receiver
    }

    /// Read commands until `quit` or end of input.
    pub fn run(&mut self, input: impl BufRead, out: &mut dyn Write) -> Result<()> {
        write!(out, "{}> ", self.prompt())?;
        out.flush()?;
        for line in input.lines() {
            let line = line?;
            match self.execute(&line, out) {
                Ok(Flow::Quit) => return Ok(()),
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "error: {e}")?,
            }
            write!(out, "{}> ", self.prompt())?;
            out.flush()?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Current position as a path; unlabelled steps show the node key.
    pub fn prompt(&mut self) -> String {
        let engine = self.runtime.lock();
        let graph = engine.graph();
        prune(graph, &mut self.path);
        if self.path.is_empty() {
            return ".".into();
        }
        self.path
            .iter()
            .map(|&item| match graph.label(item) {
                Some(label) => format!(".{label}"),
                None => format!(".{}", graph.target(item).key()),
            })
            .collect()
    }

    /// Run one command line.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = fields.split_first() else {
            return Ok(Flow::Continue);
        };
        let mut engine = self.runtime.lock();
        prune(engine.graph(), &mut self.path);
        let current = match self.path.last() {
            Some(&item) => engine.graph().target(item),
            None => engine.graph().root().unwrap_or_else(|| panic!("graph has no root")),
        };
        let find = |graph: &Graph, name: &str| {
            graph
                .node(current)
                .items()
                .iter()
                .find(|i| i.label.as_deref() == Some(name) || graph.target(i.reference).key() == name)
                .map(|i| i.reference)
        };

        match (command, args) {
            ("quit" | "exit", _) => return Ok(Flow::Quit),
            ("ls", _) => {
                let graph = engine.graph();
                for (label, child) in graph.children(current) {
                    let node = graph.node(child);
                    writeln!(
                        out,
                        "{} -> {}: (rd:{} refs:{} srefs:{}) {}",
                        child.key(),
                        label.unwrap_or(""),
                        node.root_distance(),
                        node.inbound().len(),
                        node.structural_count(),
                        if node.is_empty() { ' ' } else { '*' },
                    )?;
                }
                for entry in graph.node(current).relations() {
                    let relation = graph.target(entry.reference);
                    writeln!(out, "{} ~ {:?}", entry.label.as_deref().unwrap_or(""), graph.payload(relation))?;
                }
            }
            ("cd", []) => self.path.clear(),
            ("cd", [".."]) => {
                self.path.pop();
            }
            ("cd", [name]) => match find(engine.graph(), name) {
                Some(item) => self.path.push(item),
                None => writeln!(out, "object not found")?,
            },
            ("clone", []) => {
                let ctx = engine.graph_mut().create_context(None, None, None, None);
                writeln!(out, "context {}", ctx.key())?;
            }
            ("clone", [name]) => match find(engine.graph(), name).map(|i| engine.graph().target(i)) {
                Some(node) if engine.graph().node(node).instruction() == Some(Instruction::Launch) => {
                    let ctx = engine.graph_mut().create_context(Some(node), None, None, None);
                    writeln!(out, "context {}", ctx.key())?;
                }
                Some(_) => writeln!(out, "not a launcher")?,
                None => writeln!(out, "object not found")?,
            },
            ("rm", [name]) => match find(engine.graph(), name) {
                Some(item) => engine.graph_mut().remove_child(item),
                None => writeln!(out, "object not found")?,
            },
            ("send", [recipient, argument]) => {
                let graph = engine.graph();
                let recipient = find(graph, recipient).map(|i| graph.target(i));
                let argument = find(graph, argument)
                    .map(|i| graph.target(i))
                    .or_else(|| ObjectPath::parse(argument).and_then(|p| graph.object_by_path(&p, Some(current))));
                let (Some(recipient), Some(argument)) = (recipient, argument) else {
                    writeln!(out, "object not found")?;
                    return Ok(Flow::Continue);
                };
                if !matches!(
                    graph.node(recipient).instruction(),
                    Some(Instruction::Launch | Instruction::Receive)
                ) {
                    writeln!(out, "{} is neither a launcher nor a receiver", recipient.key())?;
                    return Ok(Flow::Continue);
                }
                writeln!(out, "sending {} to {}", argument.key(), recipient.key())?;
                let receiver = self.receiver;
                engine.graph_mut().clear_arguments(receiver);
                if let Some(stats) = engine.send_message(recipient, Some(argument), Some(receiver)) {
                    writeln!(out, "{}", serde_json::to_string(&stats)?)?;
                }
            }
            ("dump", []) => export::dump(engine.graph(), out)?,
            ("dump", [dir]) => {
                export::dump_dir(engine.graph(), dir)?;
                writeln!(out, "dumped to {dir}")?;
            }
            ("info", [name]) => match find(engine.graph(), name) {
                Some(item) => {
                    let info = engine.graph().describe(engine.graph().target(item));
                    writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
                }
                None => writeln!(out, "object not found")?,
            },
            _ => writeln!(out, "unknown command: {line}")?,
        }
        Ok(Flow::Continue)
    }

    /// Tear the graph down. Returns the number of leaked nodes.
    pub fn shutdown(self) -> usize {
        let leaked = self.runtime.with(|engine| engine.graph_mut().teardown());
        if leaked > 0 {
            warn!(leaked, "console exit left nodes behind");
        }
        leaked
    }
}

/// Drop path steps whose slot no longer exists.
fn prune(graph: &Graph, path: &mut Vec<RefId>) {
    if let Some(pos) = path.iter().position(|&item| graph.try_reference(item).is_none()) {
        path.truncate(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::engine::context::CONTEXT_REGISTRY;
    use crate::text;

    fn console(src: &str) -> Console {
        let graph = text::load_str(src).unwrap();
        Console::new(SharedRuntime::from_graph(graph, EngineConfig::default()))
    }

    fn run(console: &mut Console, line: &str) -> String {
        let mut out = Vec::new();
        console.execute(line, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn shell_context_is_created_once() {
        let mut c = console("(a: (b: _))");
        let receiver = c.receiver();
        let again = Console::new(c.runtime().clone());
        assert_eq!(again.receiver(), receiver);
        let engine = c.runtime().lock();
        let path = ObjectPath::absolute([CONTEXT_REGISTRY, SHELL_CONTEXT, SHELL_RECEIVER]);
        assert_eq!(engine.graph().object_by_path(&path, None), Some(receiver));
        drop(engine);
        assert_eq!(c.prompt(), ".");
    }

    #[test]
    fn navigation_and_listing() {
        let mut c = console("(a: (b: _, c: (d: _)))");
        run(&mut c, "cd a");
        assert_eq!(c.prompt(), ".a");
        let listing = run(&mut c, "ls");
        assert!(listing.contains("-> b: (rd:3"), "{listing}");
        assert!(listing.contains("-> c: (rd:3 refs:1 srefs:1) *"), "{listing}");
        run(&mut c, "cd c");
        assert_eq!(c.prompt(), ".a.c");
        run(&mut c, "cd ..");
        assert_eq!(c.prompt(), ".a");
        assert_eq!(run(&mut c, "cd nope"), "object not found\n");
        run(&mut c, "cd");
        assert_eq!(c.prompt(), ".");
    }

    #[test]
    fn removing_the_current_branch_resets_the_prompt() {
        let mut c = console("(a: (b: _))");
        run(&mut c, "cd a");
        run(&mut c, "cd b");
        run(&mut c, "cd ..");
        run(&mut c, "rm b");
        run(&mut c, "cd ..");
        run(&mut c, "rm a");
        assert_eq!(c.prompt(), ".");
        assert_eq!(run(&mut c, "ls").lines().filter(|l| l.contains("-> a:")).count(), 0);
    }

    #[test]
    fn info_is_json() {
        let mut c = console("(r: <0, 4>)");
        let info: serde_json::Value = serde_json::from_str(&run(&mut c, "info r")).unwrap();
        assert_eq!(info["bounds"], serde_json::json!([0, 4]));
        assert_eq!(info["root_distance"], 2);
    }

    #[test]
    fn quit_and_unknown() {
        let mut c = console("()");
        let mut out = Vec::new();
        assert_eq!(c.execute("quit", &mut out).unwrap(), Flow::Quit);
        assert_eq!(run(&mut c, "frobnicate"), "unknown command: frobnicate\n");
        assert_eq!(run(&mut c, "send a"), "unknown command: send a\n");
    }

    #[test]
    fn shutdown_releases_everything() {
        let c = console("(a: (b: _), c: a.b)");
        assert_eq!(c.shutdown(), 0);
    }
}
