//! Chess rules engine seam.
//!
//! The tree and the session controller never compute legality, SAN or FEN
//! themselves; they go through [`RulesEngine`]. [`StandardRules`] is the
//! stock implementation: shakmaty for positions and pgn-reader for chapter
//! movetext (variations are followed, not skipped).

use std::io::Cursor;
use std::ops::ControlFlow;

use pgn_reader::{Reader, SanPlus, Skip, Visitor};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, File, Move, Position, Square};

use crate::error::CoreError;
use crate::move_tree::{MoveTree, NodeId};
use crate::moves::{LineMove, MoveSquares};

/// FEN of the standard starting position.
pub const START_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Outcome of validating a candidate move against a position.
#[derive(Debug, Clone)]
pub struct Validated {
    /// FEN after the move.
    pub position: String,
    /// SAN of the move.
    pub notation: String,
}

pub trait RulesEngine: Send + Sync {
    /// Parse chapter movetext into a tree. No partial tree on failure.
    fn parse(&self, text: &str) -> Result<MoveTree, CoreError>;

    /// Validate a candidate move against a position.
    fn validate(&self, position: &str, squares: MoveSquares) -> Result<Validated, CoreError>;

    /// Legal moves in a position, optionally restricted to one origin
    /// square (promotions yield one entry per promotion role).
    fn legal_moves(
        &self,
        position: &str,
        from: Option<Square>,
    ) -> Result<Vec<MoveSquares>, CoreError>;
}

/// Canonical squares of a legal move: castling is normalized to the king's
/// two-square hop, en passant to the capture square.
pub fn move_squares(m: &Move) -> MoveSquares {
    match *m {
        Move::Normal {
            from,
            to,
            promotion,
            ..
        } => MoveSquares {
            from,
            to,
            promotion,
        },
        Move::EnPassant { from, to } => MoveSquares {
            from,
            to,
            promotion: None,
        },
        Move::Castle { king, rook } => {
            let file = if rook.file() > king.file() {
                File::new(6)
            } else {
                File::new(2)
            };
            MoveSquares {
                from: king,
                to: Square::from_coords(file, king.rank()),
                promotion: None,
            }
        }
        // Drops do not occur in standard chess.
        Move::Put { to, .. } => MoveSquares {
            from: to,
            to,
            promotion: None,
        },
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl StandardRules {
    fn position(&self, fen: &str) -> Result<Chess, CoreError> {
        let fen: Fen = fen
            .parse()
            .map_err(|e| CoreError::Position(format!("{e}")))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| CoreError::Position(format!("{e}")))
    }
}

impl RulesEngine for StandardRules {
    fn parse(&self, text: &str) -> Result<MoveTree, CoreError> {
        if text.trim().is_empty() {
            return Ok(MoveTree::new());
        }
        let mut reader = Reader::new(Cursor::new(text));
        let mut visitor = ChapterVisitor::new();
        match reader.read_game(&mut visitor) {
            Ok(Some(())) => {}
            Ok(None) => return Ok(MoveTree::new()),
            Err(e) => return Err(CoreError::Parse(e.to_string())),
        }
        match visitor.error {
            Some(e) => Err(e),
            None => Ok(visitor.tree),
        }
    }

    fn validate(&self, position: &str, squares: MoveSquares) -> Result<Validated, CoreError> {
        let pos = self.position(position)?;
        let mv = pos
            .legal_moves()
            .into_iter()
            .find(|m| move_squares(m) == squares)
            .ok_or_else(|| CoreError::Illegal(squares.token()))?;
        let notation = SanPlus::from_move(pos.clone(), mv).to_string();
        let mut next = pos;
        next.play_unchecked(mv);
        let fen = Fen::from_position(&next, EnPassantMode::Legal).to_string();
        Ok(Validated {
            position: fen,
            notation,
        })
    }

    fn legal_moves(
        &self,
        position: &str,
        from: Option<Square>,
    ) -> Result<Vec<MoveSquares>, CoreError> {
        let pos = self.position(position)?;
        Ok(pos
            .legal_moves()
            .iter()
            .map(move_squares)
            .filter(|m| from.map_or(true, |sq| m.from == sq))
            .collect())
    }
}

struct Frame {
    resume_pos: Chess,
    resume_cursor: NodeId,
}

/// Builds a [`MoveTree`] from movetext. On `(`, the walk rewinds to the
/// position before the last move so the variation attaches as a sibling of
/// it; on `)` it resumes where it left off.
struct ChapterVisitor {
    tree: MoveTree,
    pos: Chess,
    cursor: Option<NodeId>,
    stack: Vec<Frame>,
    error: Option<CoreError>,
}

impl ChapterVisitor {
    fn new() -> Self {
        Self {
            tree: MoveTree::new(),
            pos: Chess::default(),
            cursor: None,
            stack: Vec::new(),
            error: None,
        }
    }

    fn position_before(&self, node: NodeId) -> Result<Chess, CoreError> {
        match self.tree.node_previous(node) {
            Some(prev) => {
                let fen: Fen = self
                    .tree
                    .node_payload(prev)
                    .position
                    .parse()
                    .map_err(|e| CoreError::Parse(format!("{e}")))?;
                fen.into_position(CastlingMode::Standard)
                    .map_err(|e| CoreError::Parse(format!("{e}")))
            }
            None => Ok(Chess::default()),
        }
    }

    fn play_san(&mut self, san_plus: &SanPlus) -> Result<(), CoreError> {
        let mv = san_plus
            .san
            .to_move(&self.pos)
            .map_err(|e| CoreError::Parse(format!("illegal move {san_plus}: {e}")))?;
        let squares = move_squares(&mv);
        self.pos.play_unchecked(mv);
        let ply = match self.cursor {
            Some(id) => self.tree.node_payload(id).ply + 1,
            None => 1,
        };
        let payload = LineMove {
            ply,
            color: if ply % 2 == 1 {
                Color::White
            } else {
                Color::Black
            },
            notation: san_plus.to_string(),
            squares,
            position: Fen::from_position(&self.pos, EnPassantMode::Legal).to_string(),
        };
        let id = self.tree.step(self.cursor, payload).map_err(|e| match e {
            CoreError::Structural => {
                CoreError::Parse("chapter encodes more than one first move".to_string())
            }
            other => other,
        })?;
        self.cursor = Some(id);
        Ok(())
    }
}

impl Visitor for ChapterVisitor {
    type Tags = ();
    type Movetext = ();
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, _tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        ControlFlow::Continue(())
    }

    fn san(&mut self, _movetext: &mut Self::Movetext, san_plus: SanPlus) -> ControlFlow<Self::Output> {
        if self.error.is_none() {
            if let Err(e) = self.play_san(&san_plus) {
                self.error = Some(e);
            }
        }
        ControlFlow::Continue(())
    }

    fn begin_variation(
        &mut self,
        _movetext: &mut Self::Movetext,
    ) -> ControlFlow<Self::Output, Skip> {
        if self.error.is_some() {
            return ControlFlow::Continue(Skip(true));
        }
        let Some(anchor) = self.cursor else {
            // A variation before any move replaces nothing; ignore it.
            return ControlFlow::Continue(Skip(true));
        };
        match self.position_before(anchor) {
            Ok(pos) => {
                self.stack.push(Frame {
                    resume_pos: std::mem::replace(&mut self.pos, pos),
                    resume_cursor: anchor,
                });
                self.cursor = self.tree.node_previous(anchor);
                ControlFlow::Continue(Skip(false))
            }
            Err(e) => {
                self.error = Some(e);
                ControlFlow::Continue(Skip(true))
            }
        }
    }

    fn end_variation(&mut self, _movetext: &mut Self::Movetext) -> ControlFlow<Self::Output> {
        if let Some(frame) = self.stack.pop() {
            self.pos = frame.resume_pos;
            self.cursor = Some(frame.resume_cursor);
        }
        ControlFlow::Continue(())
    }

    fn end_game(&mut self, _movetext: Self::Movetext) -> Self::Output {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> MoveSquares {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_single_line() {
        let tree = StandardRules.parse("1. e4 e5 2. Nf3").unwrap();
        let lines = tree.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].key().as_str(), "e2e4 e7e5 g1f3");
        assert_eq!(lines[0].moves()[2].notation, "Nf3");
        assert_eq!(lines[0].moves()[2].ply, 3);
    }

    #[test]
    fn test_parse_follows_variations() {
        let tree = StandardRules
            .parse("1. e4 e5 (1... c5 2. Nf3) 2. Nf3 Nc6")
            .unwrap();
        let keys: Vec<String> = tree
            .lines()
            .iter()
            .map(|l| l.key().as_str().to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["e2e4 e7e5 g1f3 b8c6", "e2e4 c7c5 g1f3"]
        );
    }

    #[test]
    fn test_parse_empty_text_yields_empty_tree() {
        assert!(StandardRules.parse("").unwrap().is_empty());
        assert!(StandardRules.parse("  \n ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_illegal_movetext() {
        assert!(matches!(
            StandardRules.parse("1. e4 e4"),
            Err(CoreError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_sibling_first_moves() {
        assert!(matches!(
            StandardRules.parse("1. e4 (1. d4) 1... e5"),
            Err(CoreError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_produces_san_and_fen() {
        let v = StandardRules
            .validate(START_POSITION, token("g1f3"))
            .unwrap();
        assert_eq!(v.notation, "Nf3");
        assert!(v.position.contains(" b "));
    }

    #[test]
    fn test_validate_rejects_illegal_move() {
        assert!(matches!(
            StandardRules.validate(START_POSITION, token("e2e5")),
            Err(CoreError::Illegal(_))
        ));
    }

    #[test]
    fn test_castling_uses_king_hop_token() {
        // After 1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5, white may castle short.
        let mut fen = START_POSITION.to_string();
        for t in ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "f8c5"] {
            fen = StandardRules.validate(&fen, token(t)).unwrap().position;
        }
        let v = StandardRules.validate(&fen, token("e1g1")).unwrap();
        assert_eq!(v.notation, "O-O");
    }

    #[test]
    fn test_legal_moves_from_square() {
        let moves = StandardRules
            .legal_moves(START_POSITION, Some("e2".parse().unwrap()))
            .unwrap();
        let tokens: Vec<String> = moves.iter().map(|m| m.token()).collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains(&"e2e3".to_string()));
        assert!(tokens.contains(&"e2e4".to_string()));
    }
}
