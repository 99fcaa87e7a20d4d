//! Core error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Chapter text could not be turned into a move tree.
    #[error("chapter text parse failed: {0}")]
    Parse(String),

    /// The referenced move does not belong to this tree (stale ref, or a
    /// ref taken from another chapter's tree).
    #[error("move not found in this tree")]
    NotFound,

    /// A tree can encode only one first move; the line shares no first
    /// move with the existing root.
    #[error("line does not share a first move with this tree")]
    Structural,

    /// The move is not legal in the given position.
    #[error("illegal move: {0}")]
    Illegal(String),

    /// A position string failed to parse as FEN.
    #[error("bad position: {0}")]
    Position(String),
}
