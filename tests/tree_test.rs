//! Structural properties of the variation tree: round-trip rebuilds,
//! promote coverage, delete cascades, prefix-based line matching.

mod common;

use repertoire_core::rules::{RulesEngine, StandardRules};
use repertoire_core::{Line, LineIndex, LineKey, MoveRef, MoveSquares, MoveTree};

fn tree(text: &str) -> MoveTree {
    StandardRules.parse(text).unwrap()
}

fn keys(lines: &[Line]) -> Vec<LineKey> {
    lines.iter().map(|l| l.key()).collect()
}

fn key_set(lines: &[Line]) -> std::collections::BTreeSet<LineKey> {
    lines.iter().map(|l| l.key()).collect()
}

/// Every move in the tree, main paths and alternatives alike.
fn all_refs(t: &MoveTree) -> Vec<MoveRef> {
    let mut out = Vec::new();
    let mut stack: Vec<MoveRef> = t.first_move().into_iter().collect();
    while let Some(r) = stack.pop() {
        out.push(r);
        if let Some(c) = t.continuation(r).unwrap() {
            stack.push(c);
        }
        stack.extend(t.alternatives(r).unwrap());
    }
    out
}

const FIXTURES: &[&str] = &[
    "1. e4 e5",
    "1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4))",
    "1. d4 d5 2. c4 (2. Nf3 Nf6 3. c4) 2... e6 (2... c6 3. Nf3) 3. Nc3",
    "1. e4 c5 (1... e5 2. Nf3 Nc6 (2... Nf6)) 2. Nf3 d6 3. d4 cxd4",
];

#[test]
fn test_round_trip_merge_preserves_lines() {
    for text in FIXTURES {
        let t = tree(text);
        let lines = t.lines();
        let rebuilt = MoveTree::from_lines(lines.iter()).unwrap();
        assert_eq!(
            keys(&lines),
            keys(&rebuilt.lines()),
            "round trip diverged for {text}"
        );
    }
}

#[test]
fn test_promote_preserves_coverage_for_every_move() {
    for text in FIXTURES {
        let t = tree(text);
        let original = t.lines();
        for r in all_refs(&t) {
            let (promoted, new_ref) = t.promote(r).unwrap();
            let lines = promoted.lines();
            assert_eq!(lines.len(), original.len(), "line count changed in {text}");
            assert_eq!(
                key_set(&lines),
                key_set(&original),
                "line identities changed in {text}"
            );
            assert_eq!(
                promoted.payload(new_ref).unwrap(),
                t.payload(r).unwrap(),
                "promoted ref points at a different move in {text}"
            );
        }
    }
}

#[test]
fn test_promote_of_main_line_move_is_identity() {
    for text in FIXTURES {
        let t = tree(text);
        let mut cursor = t.first_move();
        while let Some(r) = cursor {
            let (promoted, _) = t.promote(r).unwrap();
            assert_eq!(keys(&t.lines()), keys(&promoted.lines()));
            cursor = t.continuation(r).unwrap();
        }
    }
}

#[test]
fn test_delete_cascades_exactly() {
    for text in FIXTURES {
        let t = tree(text);
        let original = t.lines();
        for r in all_refs(&t) {
            let prefix: Vec<MoveSquares> =
                t.path_to(r).unwrap().iter().map(|m| m.squares).collect();
            let pruned = t.delete(r).unwrap();
            let remaining = pruned.lines();

            // Lines that never passed through the move survive unchanged.
            for line in &original {
                if !line.matches_prefix(&prefix) {
                    assert!(
                        remaining.contains(line),
                        "untouched line lost after delete in {text}"
                    );
                }
            }
            // Nothing reaching the deleted move survives.
            for line in &remaining {
                assert!(
                    !line.matches_prefix(&prefix),
                    "deleted move still reachable in {text}"
                );
            }
        }
    }
}

#[test]
fn test_relevant_lines_is_prefix_relation() {
    let t = tree("1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4))");
    let index = LineIndex::from_tree(&t);
    let lines = t.lines();

    let paths: Vec<Vec<MoveSquares>> = vec![
        vec![],
        vec![common::sq("e2e4")],
        vec![common::sq("e2e4"), common::sq("e7e5")],
        vec![common::sq("e2e4"), common::sq("e7e5"), common::sq("g1f3"), common::sq("g8f6")],
        vec![common::sq("d2d4")],
    ];
    for played in &paths {
        let relevant = index.relevant_lines(played, false);
        for line in &lines {
            let expected = line.matches_prefix(played);
            assert_eq!(
                relevant.iter().any(|l| l.key() == line.key()),
                expected,
                "prefix relation broken for {} against {:?}",
                line.key(),
                played
            );
        }
    }
}

#[test]
fn test_promote_nested_variation_scenario() {
    let t = tree("1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4))");
    let d4_line = t.lines()[2].clone();
    assert_eq!(d4_line.key().as_str(), "e2e4 e7e5 g1f3 g8f6 d2d4");

    let d4 = match t.last_common_move(&d4_line) {
        repertoire_core::Anchor::Move(r) => r,
        other => panic!("unexpected anchor {other:?}"),
    };
    let (promoted, _) = t.promote(d4).unwrap();
    let new_keys: Vec<String> = promoted
        .lines()
        .iter()
        .map(|l| l.key().as_str().to_string())
        .collect();
    assert_eq!(new_keys[0], "e2e4 e7e5 g1f3 g8f6 d2d4");
    assert!(new_keys.contains(&"e2e4 e7e5 g1f3 b8c6".to_string()));
    assert!(new_keys.contains(&"e2e4 e7e5 g1f3 g8f6 b1c3".to_string()));
}
