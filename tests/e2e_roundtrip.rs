//! Text round trips: load, dump, load again, dump again.
//!
//! The first dump is canonical, so the second must reproduce it exactly
//! and both graphs must hold the same number of nodes.

use harmony_graph::{export, text, Graph, ObjectPath, Payload};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Shape {
    Nul,
    Range { lower: i64, span: i64 },
    /// Element of an earlier range, if there is one.
    Element { ty: usize, value: i64 },
    /// Alias of an earlier entry.
    Reference { target: usize },
    /// Proxy at an earlier entry.
    Proxy { target: usize },
    Group { children: Vec<(i64, i64)> },
    /// Proxy whose target is a group written in place.
    ProxyGroup { children: Vec<(i64, i64)> },
}

fn shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        Just(Shape::Nul),
        (-5i64..5, 0i64..10).prop_map(|(lower, span)| Shape::Range { lower, span }),
        (any::<usize>(), -5i64..15).prop_map(|(ty, value)| Shape::Element { ty, value }),
        any::<usize>().prop_map(|target| Shape::Reference { target }),
        any::<usize>().prop_map(|target| Shape::Proxy { target }),
        prop::collection::vec((0i64..3, 0i64..5), 0..4).prop_map(|children| Shape::Group { children }),
        prop::collection::vec((0i64..3, 0i64..5), 0..4).prop_map(|children| Shape::ProxyGroup { children }),
    ]
}

fn group(children: &[(i64, i64)]) -> String {
    let inner: Vec<String> = children
        .iter()
        .enumerate()
        .map(|(c, &(kind, value))| match kind {
            0 => format!("c{c}: _"),
            1 => format!("c{c}: <0, {value}>"),
            _ => format!("c{c}: (leaf: _)"),
        })
        .collect();
    format!("({})", inner.join(", "))
}

/// Render entries `e0..eN` as one root document.
fn render(shapes: &[Shape]) -> String {
    let mut ranges = Vec::new();
    let mut entries = Vec::new();
    for (n, shape) in shapes.iter().enumerate() {
        let body = match shape {
            Shape::Nul => "_".to_string(),
            Shape::Range { lower, span } => {
                ranges.push(n);
                format!("<{lower}, {}>", lower + span)
            }
            Shape::Element { ty, value } if !ranges.is_empty() => {
                format!(".e{}[{value}]", ranges[ty % ranges.len()])
            }
            Shape::Reference { target } if n > 0 => format!(".e{}", target % n),
            Shape::Proxy { target } if n > 0 => format!("$ .e{}", target % n),
            Shape::Proxy { .. } => "$".to_string(),
            Shape::Group { children } => group(children),
            Shape::ProxyGroup { children } => format!("$ _ {}", group(children)),
            _ => "_".to_string(),
        };
        entries.push(format!("e{n}: {body}"));
    }
    format!("({})", entries.join(", "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn dump_is_a_fixed_point(shapes in prop::collection::vec(shape(), 1..12)) {
        let source = render(&shapes);
        let first = text::load_str(&source).unwrap();
        let dumped = export::dump_to_string(&first).unwrap();
        let second = text::load_str(&dumped).unwrap();
        let again = export::dump_to_string(&second).unwrap();
        prop_assert_eq!(&again, &dumped);
        prop_assert_eq!(second.live_count(), first.live_count());
        second.verify().unwrap();
    }
}

// ============================================================================
// Fixed documents
// ============================================================================

fn round_trip(source: &str) -> (Graph, String) {
    let graph = text::load_str(source).unwrap();
    let dumped = export::dump_to_string(&graph).unwrap();
    let reloaded = text::load_str(&dumped).unwrap();
    assert_eq!(export::dump_to_string(&reloaded).unwrap(), dumped);
    (reloaded, dumped)
}

#[test]
fn program_text_survives() {
    let (g, dumped) = round_trip(
        "(
            relation: (next: _),
            digit: <0, 9>,
            inbox: <(named: (v: $), unnamed: ()),
            main: !(
                named: (return: $),
                body: (
                    ?((p: [relation.next, digit, out, digit]), (out), ()),
                    >(named.return, (v: out)),
                    *(out),
                    =(out, digit),
                    +(bag, out),
                    -(bag, out),
                    ^(out, digit),
                ),
            ),
            out: $,
            bag: (),
        )",
    );
    assert!(dumped.contains("? ("), "{dumped}");
    assert!(dumped.contains("[.relation.next, .digit, .out, .digit]"), "{dumped}");
    let p = g
        .object_by_path(&ObjectPath::parse(".main.body").unwrap(), None)
        .and_then(|body| g.first(body))
        .and_then(|m| g.first(m))
        .and_then(|patterns| g.first(patterns))
        .unwrap();
    assert!(matches!(g.payload(p), Payload::Pattern { .. }));
}

#[test]
fn relations_and_hints_survive() {
    let (g, dumped) = round_trip(
        r#"(
            rel: (likes: _),
            a: _,
            b: _ #"color":"blue",
            ab: [rel.likes, a, b],
        )"#,
    );
    let root = g.root().unwrap();
    assert!(g.find_relation(root, "ab").is_some());
    assert!(dumped.contains(r#"#"color":"blue""#), "{dumped}");
}
