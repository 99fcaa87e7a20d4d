//! Branching move tree for one chapter.
//!
//! Nodes live in an arena and link to each other by index, so the
//! `previous`/`continuation`/`alternatives` references never form ownership
//! cycles. The mutating operations (`delete`, `promote`) do not patch links
//! in place: they decompose the tree into lines and rebuild a fresh arena by
//! re-merging, which keeps the structural invariants intact at every step.
//!
//! Invariants:
//! - From any position exactly one move is reachable by following
//!   `continuation`; every sibling of it hangs off that move's
//!   `alternatives` list (flat, never nested).
//! - The first move has no siblings: a tree encodes a single opening move,
//!   and merging a line with a different first move is a structural error.
//! - A line is a finite root-to-leaf sequence with strictly increasing ply.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use shakmaty::Color;

use crate::error::CoreError;
use crate::moves::{Line, LineMove};

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type NodeId = usize;

/// Stable external address of a move: arena index plus the owning tree's
/// generation id, so a ref taken from another tree resolves to `NotFound`
/// instead of silently pointing at an unrelated move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveRef {
    tree: u64,
    index: NodeId,
}

#[derive(Debug, Clone)]
struct Node {
    payload: LineMove,
    previous: Option<NodeId>,
    continuation: Option<NodeId>,
    alternatives: Vec<NodeId>,
}

/// Result of walking the tree along a line's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The tree has no moves yet.
    Start,
    /// The deepest move shared between tree and line.
    Move(MoveRef),
    /// Non-empty tree whose first move differs from the line's.
    NotAttachable,
}

#[derive(Debug)]
pub struct MoveTree {
    id: u64,
    arena: Vec<Node>,
    first: Option<NodeId>,
}

impl Default for MoveTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveTree {
    pub fn new() -> Self {
        Self {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            arena: Vec::new(),
            first: None,
        }
    }

    /// Fresh tree built by merging `lines` in order. The first line becomes
    /// the main path; later lines attach at their divergence points.
    pub fn from_lines<'a, I>(lines: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = &'a Line>,
    {
        let mut tree = Self::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            tree.merge(line)?;
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    pub fn move_count(&self) -> usize {
        self.arena.len()
    }

    pub fn first_move(&self) -> Option<MoveRef> {
        self.first.map(|id| self.make_ref(id))
    }

    fn make_ref(&self, index: NodeId) -> MoveRef {
        MoveRef {
            tree: self.id,
            index,
        }
    }

    fn resolve(&self, r: MoveRef) -> Result<NodeId, CoreError> {
        if r.tree == self.id && r.index < self.arena.len() {
            Ok(r.index)
        } else {
            Err(CoreError::NotFound)
        }
    }

    pub fn payload(&self, r: MoveRef) -> Result<&LineMove, CoreError> {
        Ok(&self.arena[self.resolve(r)?].payload)
    }

    pub fn previous(&self, r: MoveRef) -> Result<Option<MoveRef>, CoreError> {
        Ok(self.arena[self.resolve(r)?]
            .previous
            .map(|id| self.make_ref(id)))
    }

    pub fn continuation(&self, r: MoveRef) -> Result<Option<MoveRef>, CoreError> {
        Ok(self.arena[self.resolve(r)?]
            .continuation
            .map(|id| self.make_ref(id)))
    }

    pub fn alternatives(&self, r: MoveRef) -> Result<Vec<MoveRef>, CoreError> {
        Ok(self.arena[self.resolve(r)?]
            .alternatives
            .iter()
            .map(|&id| self.make_ref(id))
            .collect())
    }

    /// Payloads of the moves from the chapter start up to and including `r`.
    pub fn path_to(&self, r: MoveRef) -> Result<Vec<LineMove>, CoreError> {
        let mut id = Some(self.resolve(r)?);
        let mut path = Vec::new();
        while let Some(cur) = id {
            path.push(self.arena[cur].payload.clone());
            id = self.arena[cur].previous;
        }
        path.reverse();
        Ok(path)
    }

    /// True when `r` sits on the main path (reachable from the first move
    /// by `continuation` alone).
    pub fn is_main_line(&self, r: MoveRef) -> Result<bool, CoreError> {
        let target = self.resolve(r)?;
        let mut cursor = self.first;
        while let Some(id) = cursor {
            if id == target {
                return Ok(true);
            }
            cursor = self.arena[id].continuation;
        }
        Ok(false)
    }

    fn push(&mut self, payload: LineMove, previous: Option<NodeId>) -> NodeId {
        let id = self.arena.len();
        self.arena.push(Node {
            payload,
            previous,
            continuation: None,
            alternatives: Vec::new(),
        });
        id
    }

    pub(crate) fn node_payload(&self, id: NodeId) -> &LineMove {
        &self.arena[id].payload
    }

    pub(crate) fn node_previous(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].previous
    }

    /// Advance one ply from `prev`, reusing an existing matching move or
    /// attaching a new node: into the free `continuation` slot, or as an
    /// alternative of the move already occupying it. Attaching a sibling of
    /// the first move is a structural error.
    pub(crate) fn step(
        &mut self,
        prev: Option<NodeId>,
        payload: LineMove,
    ) -> Result<NodeId, CoreError> {
        let slot = match prev {
            None => self.first,
            Some(p) => self.arena[p].continuation,
        };
        match slot {
            None => {
                let id = self.push(payload, prev);
                match prev {
                    None => self.first = Some(id),
                    Some(p) => self.arena[p].continuation = Some(id),
                }
                Ok(id)
            }
            Some(primary) => {
                if self.arena[primary].payload.squares == payload.squares {
                    return Ok(primary);
                }
                if let Some(&alt) = self.arena[primary]
                    .alternatives
                    .iter()
                    .find(|&&a| self.arena[a].payload.squares == payload.squares)
                {
                    return Ok(alt);
                }
                if prev.is_none() {
                    return Err(CoreError::Structural);
                }
                let id = self.push(payload, prev);
                self.arena[primary].alternatives.push(id);
                Ok(id)
            }
        }
    }

    /// Walk the tree guided by the line's tokens: follow `continuation`
    /// when it matches the next token, else switch into a matching
    /// alternative; stop at the first mismatch.
    pub fn last_common_move(&self, line: &Line) -> Anchor {
        let Some(first) = self.first else {
            return Anchor::Start;
        };
        let mut matched: Option<NodeId> = None;
        let mut candidate = Some(first);
        for mv in line.moves() {
            let Some(head) = candidate else {
                break;
            };
            let found = std::iter::once(head)
                .chain(self.arena[head].alternatives.iter().copied())
                .find(|&id| self.arena[id].payload.squares == mv.squares);
            match found {
                Some(id) => {
                    matched = Some(id);
                    candidate = self.arena[id].continuation;
                }
                None => break,
            }
        }
        match matched {
            Some(id) => Anchor::Move(self.make_ref(id)),
            None => Anchor::NotAttachable,
        }
    }

    /// Merge a line: the shared prefix is absorbed, the diverging suffix is
    /// appended (extending a leaf's `continuation`, or as a new alternative
    /// at the divergence point). Returns the line's final move in the tree.
    pub fn merge(&mut self, line: &Line) -> Result<MoveRef, CoreError> {
        let mut cursor: Option<NodeId> = None;
        for mv in line.moves() {
            cursor = Some(self.step(cursor, mv.clone())?);
        }
        // An empty line has no first move to share with the tree.
        cursor
            .map(|id| self.make_ref(id))
            .ok_or(CoreError::Structural)
    }

    fn collect_paths(&self, prefix: Vec<NodeId>, head: NodeId, out: &mut Vec<Vec<NodeId>>) {
        let mut path = prefix;
        let mut branches: Vec<(Vec<NodeId>, NodeId)> = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            for &alt in &self.arena[id].alternatives {
                branches.push((path.clone(), alt));
            }
            path.push(id);
            cursor = self.arena[id].continuation;
        }
        out.push(path);
        for (prefix, alt) in branches {
            self.collect_paths(prefix, alt, out);
        }
    }

    fn paths(&self) -> Vec<Vec<NodeId>> {
        let mut out = Vec::new();
        if let Some(first) = self.first {
            self.collect_paths(Vec::new(), first, &mut out);
        }
        out
    }

    fn line_of(&self, ids: &[NodeId]) -> Line {
        Line::new(ids.iter().map(|&id| self.arena[id].payload.clone()).collect())
    }

    /// Every root-to-leaf line: the main path first, then one line per
    /// alternative in stored order, recursively.
    pub fn lines(&self) -> Vec<Line> {
        self.paths().into_iter().map(|p| {
            Line::new(p.into_iter().map(|id| self.arena[id].payload.clone()).collect())
        }).collect()
    }

    /// New tree with `target` and everything downstream of it removed from
    /// every line that passes through it. Lines whose first move is the
    /// target disappear entirely.
    pub fn delete(&self, target: MoveRef) -> Result<MoveTree, CoreError> {
        let target = self.resolve(target)?;
        let mut survivors: Vec<Line> = Vec::new();
        for path in self.paths() {
            match path.iter().position(|&id| id == target) {
                Some(0) => {}
                Some(i) => survivors.push(self.line_of(&path[..i])),
                None => survivors.push(self.line_of(&path)),
            }
        }
        // Truncated branches may now duplicate prefixes of other survivors;
        // re-merging absorbs those for free.
        MoveTree::from_lines(survivors.iter())
    }

    /// Re-root so the line through `target` becomes the main line: merge
    /// that line into a fresh tree first, then every other line in original
    /// order, so displaced segments re-attach at their true divergence
    /// points. Returns the new tree plus the ref of the same logical move.
    pub fn promote(&self, target: MoveRef) -> Result<(MoveTree, MoveRef), CoreError> {
        let target = self.resolve(target)?;
        let paths = self.paths();
        // A prefix move belongs to several lines; take the main-most one.
        let chosen = paths
            .iter()
            .position(|p| p.contains(&target))
            .ok_or(CoreError::NotFound)?;
        let depth = paths[chosen]
            .iter()
            .position(|&id| id == target)
            .ok_or(CoreError::NotFound)?;

        let mut tree = MoveTree::new();
        tree.merge(&self.line_of(&paths[chosen]))?;
        for (i, path) in paths.iter().enumerate() {
            if i != chosen {
                tree.merge(&self.line_of(path))?;
            }
        }

        // The promoted line is the new main path; its node at `depth` is
        // the counterpart of `target`.
        let mut cursor = tree.first.ok_or(CoreError::NotFound)?;
        for _ in 0..depth {
            cursor = tree.arena[cursor].continuation.ok_or(CoreError::NotFound)?;
        }
        let promoted = tree.make_ref(cursor);
        Ok((tree, promoted))
    }

    /// Movetext rendering: main line with variations in parentheses, in
    /// alternative order. `parse(render_text())` reproduces `lines()`.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if let Some(first) = self.first {
            self.render_chain(first, &mut out);
        }
        out.trim_end().to_string()
    }

    fn render_chain(&self, head: NodeId, out: &mut String) {
        let mut cursor = Some(head);
        let mut force_number = true;
        while let Some(id) = cursor {
            let node = &self.arena[id];
            self.render_move(node, force_number, out);
            force_number = false;
            for &alt in &node.alternatives {
                out.push('(');
                self.render_chain(alt, out);
                if out.ends_with(' ') {
                    out.pop();
                }
                out.push_str(") ");
                force_number = true;
            }
            cursor = node.continuation;
        }
    }

    fn render_move(&self, node: &Node, force_number: bool, out: &mut String) {
        let ply = node.payload.ply;
        if node.payload.color == Color::White {
            let _ = write!(out, "{}. ", ply.div_ceil(2));
        } else if force_number {
            let _ = write!(out, "{}... ", ply / 2);
        }
        out.push_str(&node.payload.notation);
        out.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::LineKey;
    use crate::rules::{RulesEngine, StandardRules};

    fn tree(text: &str) -> MoveTree {
        StandardRules.parse(text).unwrap()
    }

    fn keys(tree: &MoveTree) -> Vec<String> {
        tree.lines().iter().map(|l| l.key().as_str().to_string()).collect()
    }

    fn notations(line: &Line) -> String {
        line.moves()
            .iter()
            .map(|m| m.notation.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_lines_main_then_alternatives() {
        let t = tree("1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4))");
        let lines = t.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(notations(&lines[0]), "e4 e5 Nf3 Nc6");
        assert_eq!(notations(&lines[1]), "e4 e5 Nf3 Nf6 Nc3");
        assert_eq!(notations(&lines[2]), "e4 e5 Nf3 Nf6 d4");
    }

    #[test]
    fn test_merge_round_trip_preserves_line_set() {
        let t = tree("1. e4 e5 2. Nf3 (2. f4 exf4 3. Bc4) 2... Nc6 (2... Nf6 3. Nc3 (3. d4))");
        let rebuilt = MoveTree::from_lines(t.lines().iter()).unwrap();
        assert_eq!(keys(&t), keys(&rebuilt));
    }

    #[test]
    fn test_merge_extends_leaf() {
        let mut t = tree("1. e4 e5");
        let longer = tree("1. e4 e5 2. Nf3");
        let lines = longer.lines();
        t.merge(&lines[0]).unwrap();
        assert_eq!(keys(&t), vec!["e2e4 e7e5 g1f3"]);
    }

    #[test]
    fn test_merge_attaches_suffix_as_alternative() {
        let mut t = tree("1. e4 e5 2. Nf3");
        let other = tree("1. e4 c5 2. Nf3");
        t.merge(&other.lines()[0]).unwrap();
        let lines = t.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(notations(&lines[0]), "e4 e5 Nf3");
        assert_eq!(notations(&lines[1]), "e4 c5 Nf3");
    }

    #[test]
    fn test_merge_different_first_move_is_structural() {
        let mut t = tree("1. e4 e5");
        let other = tree("1. d4 d5");
        assert!(matches!(
            t.merge(&other.lines()[0]),
            Err(CoreError::Structural)
        ));
    }

    #[test]
    fn test_last_common_move_anchors() {
        let t = tree("1. e4 e5 2. Nf3 Nc6");
        let probe = tree("1. e4 e5 2. f4");
        let probe_lines = probe.lines();
        let line = &probe_lines[0];
        match t.last_common_move(line) {
            Anchor::Move(r) => assert_eq!(t.payload(r).unwrap().notation, "e5"),
            other => panic!("expected anchor move, got {other:?}"),
        }

        let empty = MoveTree::new();
        assert_eq!(empty.last_common_move(line), Anchor::Start);

        let disjoint = tree("1. d4 d5");
        assert_eq!(
            disjoint.last_common_move(line),
            Anchor::NotAttachable
        );
    }

    #[test]
    fn test_delete_cascades_exactly() {
        let t = tree("1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4))");
        // Nf6 is the fifth node pushed; find it by walking instead.
        let lines = t.lines();
        let nf6_line = &lines[1];
        let anchor = match t.last_common_move(nf6_line) {
            Anchor::Move(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        // anchor is Nc3, the line's last move; delete its previous (Nf6)
        let nf6 = t.previous(anchor).unwrap().unwrap();
        assert_eq!(t.payload(nf6).unwrap().notation, "Nf6");

        let pruned = t.delete(nf6).unwrap();
        assert_eq!(keys(&pruned), vec!["e2e4 e7e5 g1f3 b8c6"]);
    }

    #[test]
    fn test_delete_interior_move_truncates() {
        let t = tree("1. e4 e5 2. Nf3 Nc6");
        let leaf = match t.last_common_move(&t.lines()[0]) {
            Anchor::Move(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        let pruned = t.delete(leaf).unwrap();
        assert_eq!(keys(&pruned), vec!["e2e4 e7e5 g1f3"]);
    }

    #[test]
    fn test_delete_first_move_empties_tree() {
        let t = tree("1. e4 e5");
        let first = t.first_move().unwrap();
        let pruned = t.delete(first).unwrap();
        assert!(pruned.is_empty());
        assert!(pruned.lines().is_empty());
    }

    #[test]
    fn test_promote_nested_variation() {
        let t = tree("1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4))");
        let lines = t.lines();
        let d4 = match t.last_common_move(&lines[2]) {
            Anchor::Move(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(t.payload(d4).unwrap().notation, "d4");

        let (promoted, new_ref) = t.promote(d4).unwrap();
        let lines = promoted.lines();
        assert_eq!(notations(&lines[0]), "e4 e5 Nf3 Nf6 d4");
        assert_eq!(promoted.payload(new_ref).unwrap().notation, "d4");
        assert!(promoted.is_main_line(new_ref).unwrap());

        let key_set: std::collections::BTreeSet<LineKey> =
            lines.iter().map(|l| l.key()).collect();
        let original_set: std::collections::BTreeSet<LineKey> =
            t.lines().iter().map(|l| l.key()).collect();
        assert_eq!(key_set, original_set);
        let line_notations: Vec<String> = lines.iter().map(notations).collect();
        assert!(line_notations.contains(&"e4 e5 Nf3 Nc6".to_string()));
        assert!(line_notations.contains(&"e4 e5 Nf3 Nf6 Nc3".to_string()));
    }

    #[test]
    fn test_promote_main_line_is_identity() {
        let t = tree("1. e4 e5 2. Nf3 Nc6 (2... Nf6)");
        let main_leaf = match t.last_common_move(&t.lines()[0]) {
            Anchor::Move(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        let (promoted, new_ref) = t.promote(main_leaf).unwrap();
        assert_eq!(keys(&t), keys(&promoted));
        assert_eq!(
            promoted.payload(new_ref).unwrap(),
            t.payload(main_leaf).unwrap()
        );
    }

    #[test]
    fn test_refs_do_not_cross_trees() {
        let a = tree("1. e4 e5");
        let b = tree("1. e4 e5");
        let first = a.first_move().unwrap();
        assert!(matches!(b.payload(first), Err(CoreError::NotFound)));
        assert!(matches!(b.delete(first), Err(CoreError::NotFound)));
        assert!(matches!(b.promote(first), Err(CoreError::NotFound)));
    }

    #[test]
    fn test_render_text_round_trip() {
        let source = "1. e4 e5 2. Nf3 Nc6 (2... Nf6 3. Nc3 (3. d4)) 3. Bb5";
        let t = tree(source);
        let rendered = t.render_text();
        let reparsed = tree(&rendered);
        assert_eq!(keys(&t), keys(&reparsed));
    }
}
