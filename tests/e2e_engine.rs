//! End-to-end tests for the execution engine.
//!
//! Programs are loaded from text, launched with `Engine::send_message` and
//! inspected through the graph API once the run queue drains.

use harmony_graph::{text, Engine, EngineConfig, Graph, NodeId, ObjectPath, Payload};
use pretty_assertions::assert_eq;

fn at(g: &Graph, path: &str) -> NodeId {
    g.object_by_path(&ObjectPath::parse(path).unwrap(), None)
        .unwrap_or_else(|| panic!("{path} does not resolve"))
}

fn value_at(g: &Graph, path: &str) -> i64 {
    match g.payload(at(g, path)) {
        Payload::Element { value, .. } => value,
        other => panic!("{path} is {other:?}"),
    }
}

fn registry_is_empty(engine: &mut Engine) -> bool {
    let registry = engine.graph_mut().context_registry();
    engine.graph().node(registry).is_empty()
}

// ============================================================================
// 1. A launched body replies through its return slot
// ============================================================================

#[test]
fn launch_replies_through_return_slot() {
    let g = text::load_str(
        "(
            digit: <0, 9>,
            inbox: <(named: (v: $), unnamed: ()),
            msg: (x: (v: digit[3])),
            main: !(
                named: (x: $, return: $),
                body: (>(named.return, named.x)),
            ),
        )",
    )
    .unwrap();
    let mut engine = Engine::new(g, EngineConfig::default());
    let (main, msg, inbox) = {
        let g = engine.graph();
        (at(g, ".main"), at(g, ".msg"), at(g, ".inbox"))
    };

    let stats = engine.send_message(main, Some(msg), Some(inbox)).unwrap();
    assert_eq!(stats.terminated, 1);
    assert_eq!(stats.suspended, 0);
    assert!(!stats.budget_exhausted);

    let g = engine.graph();
    let delivered = at(g, ".inbox.named.v.$");
    assert_ne!(delivered, at(g, ".msg.x.v"));
    assert_eq!(g.payload(delivered), Payload::Element { ty: at(g, ".digit"), value: 3 });
    assert_eq!(g.exec(inbox).got, 1);
    g.verify().unwrap();
    assert!(registry_is_empty(&mut engine));
}

// ============================================================================
// 2. A receiver with three structured slots waits for all three senders
// ============================================================================

#[test]
fn receive_joins_three_senders() {
    let g = text::load_str(
        "(
            digit: <0, 9>,
            one: (n: $ digit[1]),
            two: (n: $ digit[2]),
            three: (n: $ digit[3]),
            inbox: <(named: (a: $, b: $, c: $), unnamed: ()),
            worker: !(
                named: (return: $, v: $),
                body: (>(named.return, named.v)),
            ),
            main: !(
                named: (return: $),
                body: (
                    >(worker, (return: join.named.a, v: one)),
                    >(worker, (return: join.named.b, v: two)),
                    >(worker, (return: join.named.c, v: three)),
                    join: <(named: (a: (n: $), b: (n: $), c: (n: $)), unnamed: ()),
                    >(named.return, join.named),
                ),
            ),
        )",
    )
    .unwrap();
    let mut engine = Engine::new(g, EngineConfig::default());
    let (main, inbox) = (at(engine.graph(), ".main"), at(engine.graph(), ".inbox"));

    let stats = engine.send_message(main, None, Some(inbox)).unwrap();
    assert_eq!(stats.terminated, 4);
    assert_eq!(stats.suspended, 1);
    assert_eq!(engine.wait_queue().count(), 0);
    assert_eq!(engine.run_queue().count(), 0);

    let g = engine.graph();
    assert_eq!(value_at(g, ".inbox.named.a.$.n.$"), 1);
    assert_eq!(value_at(g, ".inbox.named.b.$.n.$"), 2);
    assert_eq!(value_at(g, ".inbox.named.c.$.n.$"), 3);
    // the program text itself is untouched
    assert_eq!(g.get_object(at(g, ".main.body.join.named.a.n")), None);
    g.verify().unwrap();
    assert!(registry_is_empty(&mut engine));
}

#[test]
fn join_wakes_behind_runnable_contexts() {
    let g = text::load_str(
        "(
            digit: <0, 9>,
            one: (n: $ digit[1]),
            two: (n: $ digit[2]),
            three: (n: $ digit[3]),
            inbox: <(named: (a: $, b: $, c: $), unnamed: ()),
            worker: !(
                named: (return: $, v: $),
                body: (>(named.return, named.v)),
            ),
            idler: !(named: (return: $), body: (~)),
            main: !(
                named: (return: $),
                body: (
                    >(worker, (return: join.named.a, v: one)),
                    >(worker, (return: join.named.b, v: two)),
                    >(worker, (return: join.named.c, v: three)),
                    >(idler, (return: one)),
                    join: <(named: (a: (n: $), b: (n: $), c: (n: $)), unnamed: ()),
                    >(named.return, join.named),
                ),
            ),
        )",
    )
    .unwrap();
    let config = EngineConfig { max_steps: Some(1), ..EngineConfig::default() };
    let mut engine = Engine::new(g, config);
    let (main, inbox) = (at(engine.graph(), ".main"), at(engine.graph(), ".inbox"));

    let first = engine.send_message(main, None, Some(inbox)).unwrap();
    assert!(first.budget_exhausted);
    let main_ctx = engine.run_queue().next().unwrap();

    // one step at a time until main parks on the join
    for _ in 0..10 {
        if engine.is_waiting(main_ctx) {
            break;
        }
        assert_eq!(engine.run().steps, 1);
    }
    assert!(engine.is_waiting(main_ctx));
    let join = engine
        .graph()
        .object_by_path(&ObjectPath::relative(["root", "body", "join"]), Some(main_ctx))
        .unwrap();
    assert_eq!(engine.graph().exec(join).armed, 3);
    let queued: Vec<NodeId> = engine.run_queue().collect();
    assert_eq!(queued.len(), 4);
    let idler = queued[3];

    // the first two deliveries leave main parked
    engine.run();
    assert_eq!(engine.graph().exec(join).got, 1);
    assert!(engine.is_waiting(main_ctx));
    assert_eq!(engine.run_queue().collect::<Vec<_>>(), queued[1..].to_vec());

    engine.run();
    assert_eq!(engine.graph().exec(join).got, 2);
    assert!(engine.is_waiting(main_ctx));
    assert_eq!(engine.run_queue().collect::<Vec<_>>(), queued[2..].to_vec());

    // the third wakes it to the back, behind the idler
    engine.run();
    assert_eq!(engine.graph().exec(join).got, 3);
    assert_eq!(engine.wait_queue().count(), 0);
    assert_eq!(engine.run_queue().collect::<Vec<_>>(), vec![idler, main_ctx]);

    for _ in 0..20 {
        if !engine.run().budget_exhausted {
            break;
        }
    }
    assert_eq!(engine.run_queue().count(), 0);
    let g = engine.graph();
    assert_eq!(value_at(g, ".inbox.named.a.$.n.$"), 1);
    assert_eq!(value_at(g, ".inbox.named.c.$.n.$"), 3);
    g.verify().unwrap();
    assert!(registry_is_empty(&mut engine));
}

// ============================================================================
// 3. Suspended contexts stay parked until woken
// ============================================================================

#[test]
fn unanswered_receive_stays_parked() {
    let g = text::load_str(
        "(
            main: !(
                named: (),
                body: (<(named: (x: (v: $)), unnamed: ())),
            ),
        )",
    )
    .unwrap();
    let mut engine = Engine::new(g, EngineConfig::default());
    let main = at(engine.graph(), ".main");

    let stats = engine.send_message(main, None, None).unwrap();
    assert_eq!(stats.suspended, 1);
    assert_eq!(stats.terminated, 0);
    let ctx = engine.wait_queue().next().unwrap();
    assert!(engine.is_waiting(ctx));
    assert!(!engine.is_runnable(ctx));

    // running again does nothing for a parked context
    assert_eq!(engine.run(), Default::default());
    assert!(engine.is_waiting(ctx));
    engine.graph().verify().unwrap();
}

// ============================================================================
// 4. The sentinel element dumps and execution carries on
// ============================================================================

#[test]
fn sentinel_element_is_a_no_op_step() {
    let g = text::load_str(
        "(
            digit: <-1, 9>,
            main: !(named: (), body: (digit[-1], digit[-1])),
        )",
    )
    .unwrap();
    for dump_on_sentinel in [true, false] {
        let config = EngineConfig { dump_on_sentinel, ..EngineConfig::default() };
        let mut engine = Engine::new(g.clone(), config);
        let main = at(engine.graph(), ".main");
        let stats = engine.send_message(main, None, None).unwrap();
        assert_eq!(stats.steps, 3);
        assert_eq!(stats.terminated, 1);
    }
}

// ============================================================================
// 5. Step budget
// ============================================================================

#[test]
fn budget_resumes_where_it_stopped() {
    let g = text::load_str("(main: !(named: (), body: (~, ~, ~, ~)))").unwrap();
    let config = EngineConfig { max_steps: Some(3), ..EngineConfig::default() };
    let mut engine = Engine::new(g, config);
    let main = at(engine.graph(), ".main");

    let first = engine.send_message(main, None, None).unwrap();
    assert!(first.budget_exhausted);
    assert_eq!(first.steps, 3);
    let second = engine.run();
    assert!(!second.budget_exhausted);
    assert_eq!(second.steps, 2);
    assert_eq!(second.terminated, 1);
    assert!(registry_is_empty(&mut engine));
}
