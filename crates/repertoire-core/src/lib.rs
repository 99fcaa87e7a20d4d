//! Variation-tree engine for a chess-opening trainer.
//!
//! A chapter's movetext becomes a branching [`MoveTree`]; the tree
//! decomposes into [`Line`]s tracked by a [`LineIndex`]; a session layer
//! (see the `trainer-session` crate) drives practice on top. Chess
//! legality, SAN and FEN are delegated to the [`rules::RulesEngine`] seam.

pub mod error;
pub mod lesson;
pub mod line_index;
pub mod move_tree;
pub mod moves;
pub mod rules;

pub use error::CoreError;
pub use lesson::{Chapter, Lesson};
pub use line_index::{LineIndex, LineStats};
pub use move_tree::{Anchor, MoveRef, MoveTree};
pub use moves::{Line, LineKey, LineMove, MoveSquares};
