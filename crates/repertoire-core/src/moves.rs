//! Move, line and line-identity types shared by the tree and the trainer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::{Color, Role, Square};

use crate::error::CoreError;

/// Origin/destination/promotion triple.
///
/// This is the single canonical move identity used everywhere: SAN can be
/// ambiguous across locales and FEN hashes drift on en-passant details, so
/// lines are matched and keyed on squares alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveSquares {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl MoveSquares {
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    /// Lowercase UCI token, e.g. `e2e4` or `e7e8q`.
    pub fn token(&self) -> String {
        match self.promotion {
            Some(role) => format!("{}{}{}", self.from, self.to, role.char()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

impl fmt::Display for MoveSquares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for MoveSquares {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() || s.len() < 4 || s.len() > 5 {
            return Err(CoreError::Parse(format!("bad move token: {s}")));
        }
        let from: Square = s[..2]
            .parse()
            .map_err(|_| CoreError::Parse(format!("bad square in token: {s}")))?;
        let to: Square = s[2..4]
            .parse()
            .map_err(|_| CoreError::Parse(format!("bad square in token: {s}")))?;
        let promotion = match s.as_bytes().get(4) {
            Some(&c) => Some(
                Role::from_char(c as char)
                    .ok_or_else(|| CoreError::Parse(format!("bad promotion in token: {s}")))?,
            ),
            None => None,
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

/// One ply of a line, carrying everything needed to replay or re-merge it
/// without consulting the rules engine again.
#[derive(Debug, Clone, PartialEq)]
pub struct LineMove {
    /// 1-based half-move count from the chapter start.
    pub ply: u32,
    /// Side that made the move.
    pub color: Color,
    /// SAN for display.
    pub notation: String,
    /// Canonical move identity.
    pub squares: MoveSquares,
    /// FEN after the move. Opaque to the tree; produced by the rules engine.
    pub position: String,
}

/// Canonical line identity: the line's UCI tokens space-joined.
/// Two lines are equal iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineKey(String);

impl LineKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One complete root-to-leaf sequence of moves.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    moves: Vec<LineMove>,
}

impl Line {
    pub fn new(moves: Vec<LineMove>) -> Self {
        Self { moves }
    }

    pub fn moves(&self) -> &[LineMove] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn last(&self) -> Option<&LineMove> {
        self.moves.last()
    }

    pub fn key(&self) -> LineKey {
        let tokens: Vec<String> = self.moves.iter().map(|m| m.squares.token()).collect();
        LineKey(tokens.join(" "))
    }

    pub fn tokens(&self) -> Vec<MoveSquares> {
        self.moves.iter().map(|m| m.squares).collect()
    }

    /// True when the line's first `played.len()` tokens equal `played` exactly.
    pub fn matches_prefix(&self, played: &[MoveSquares]) -> bool {
        played.len() <= self.moves.len()
            && played
                .iter()
                .zip(&self.moves)
                .all(|(token, mv)| *token == mv.squares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::Square;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[test]
    fn test_token_round_trip() {
        let mv = MoveSquares::new(sq("e2"), sq("e4"));
        assert_eq!(mv.token(), "e2e4");
        assert_eq!("e2e4".parse::<MoveSquares>().unwrap(), mv);

        let promo = MoveSquares {
            from: sq("e7"),
            to: sq("e8"),
            promotion: Some(Role::Queen),
        };
        assert_eq!(promo.token(), "e7e8q");
        assert_eq!("e7e8q".parse::<MoveSquares>().unwrap(), promo);
    }

    #[test]
    fn test_bad_tokens_rejected() {
        assert!("e2".parse::<MoveSquares>().is_err());
        assert!("e2e9".parse::<MoveSquares>().is_err());
        assert!("e7e8x".parse::<MoveSquares>().is_err());
    }

    #[test]
    fn test_prefix_match_is_exact() {
        let line = Line::new(
            [("e2e4", 1), ("e7e5", 2)]
                .iter()
                .map(|(t, ply)| LineMove {
                    ply: *ply,
                    color: if *ply % 2 == 1 {
                        Color::White
                    } else {
                        Color::Black
                    },
                    notation: String::new(),
                    squares: t.parse().unwrap(),
                    position: String::new(),
                })
                .collect(),
        );

        let e4: MoveSquares = "e2e4".parse().unwrap();
        let d4: MoveSquares = "d2d4".parse().unwrap();
        let e5: MoveSquares = "e7e5".parse().unwrap();

        assert!(line.matches_prefix(&[]));
        assert!(line.matches_prefix(&[e4]));
        assert!(line.matches_prefix(&[e4, e5]));
        assert!(!line.matches_prefix(&[d4]));
        assert!(!line.matches_prefix(&[e4, e5, e4])); // longer than the line
        assert_eq!(line.key().as_str(), "e2e4 e7e5");
    }
}
