//! Curriculum lines and per-chapter completion tracking.

use std::collections::HashMap;

use crate::move_tree::MoveTree;
use crate::moves::{Line, LineKey, LineMove, MoveSquares};

/// Completion flags keyed by canonical line identity. Kept separate from
/// the line list so it can survive chapter navigation within a lesson.
#[derive(Debug, Clone, Default)]
pub struct LineStats {
    complete: HashMap<LineKey, bool>,
}

impl LineStats {
    pub fn is_complete(&self, key: &LineKey) -> bool {
        self.complete.get(key).copied().unwrap_or(false)
    }

    /// Idempotent.
    pub fn mark_complete(&mut self, key: &LineKey) {
        self.complete.insert(key.clone(), true);
    }

    pub fn completed_count(&self) -> usize {
        self.complete.values().filter(|&&c| c).count()
    }
}

/// The distinct lines of one chapter's tree, in curriculum order, plus
/// their completion state.
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    lines: Vec<Line>,
    stats: LineStats,
}

impl LineIndex {
    pub fn from_tree(tree: &MoveTree) -> Self {
        Self::from_lines(tree.lines())
    }

    pub fn from_lines(lines: Vec<Line>) -> Self {
        let complete = lines.iter().map(|l| (l.key(), false)).collect();
        Self {
            lines,
            stats: LineStats { complete },
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, key: &LineKey) -> Option<&Line> {
        self.lines.iter().find(|l| l.key() == *key)
    }

    pub fn keys(&self) -> Vec<LineKey> {
        self.lines.iter().map(|l| l.key()).collect()
    }

    pub fn stats(&self) -> &LineStats {
        &self.stats
    }

    /// Re-apply completion flags from a previous visit; keys no longer in
    /// the curriculum are dropped.
    pub fn restore_stats(&mut self, old: &LineStats) {
        let complete = self
            .lines
            .iter()
            .map(|l| {
                let key = l.key();
                let done = old.is_complete(&key);
                (key, done)
            })
            .collect();
        self.stats = LineStats { complete };
    }

    pub fn is_complete(&self, key: &LineKey) -> bool {
        self.stats.is_complete(key)
    }

    pub fn mark_complete(&mut self, key: &LineKey) {
        self.stats.mark_complete(key);
    }

    pub fn all_complete(&self) -> bool {
        self.lines.iter().all(|l| self.stats.is_complete(&l.key()))
    }

    pub fn first_incomplete(&self) -> Option<&Line> {
        self.lines.iter().find(|l| !self.stats.is_complete(&l.key()))
    }

    /// Every curriculum line whose token prefix equals `played` exactly.
    pub fn relevant_lines(&self, played: &[MoveSquares], incomplete_only: bool) -> Vec<&Line> {
        self.lines
            .iter()
            .filter(|l| l.matches_prefix(played))
            .filter(|l| !incomplete_only || !self.stats.is_complete(&l.key()))
            .collect()
    }

    /// De-duplicated set of moves that occur right after `played` across
    /// all relevant lines, in curriculum order. Several book replies can
    /// all be correct at once.
    pub fn expected_next_moves(
        &self,
        played: &[MoveSquares],
        incomplete_only: bool,
    ) -> Vec<&LineMove> {
        let mut seen: Vec<MoveSquares> = Vec::new();
        let mut out = Vec::new();
        for line in self.relevant_lines(played, incomplete_only) {
            if let Some(mv) = line.moves().get(played.len()) {
                if !seen.contains(&mv.squares) {
                    seen.push(mv.squares);
                    out.push(mv);
                }
            }
        }
        out
    }

    /// The line completed by `played`, if the played path equals its full
    /// token sequence in length and content.
    pub fn completed_line(&self, played: &[MoveSquares]) -> Option<&Line> {
        self.lines
            .iter()
            .find(|l| l.len() == played.len() && l.matches_prefix(played))
    }
}
