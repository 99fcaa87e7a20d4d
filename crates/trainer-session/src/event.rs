//! Inputs to the session controller.
//!
//! Everything that can change session state arrives here: user gestures,
//! board-animation acknowledgments, and timer expiries all flow through one
//! ordered queue, so the controller never runs logic from callbacks.

use repertoire_core::{Lesson, LineKey, MoveRef, MoveSquares};

/// Identifies one scheduled opponent reply. Tokens from an earlier epoch
/// (before a mode/chapter/lesson change) are ignored when they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub epoch: u64,
    pub seq: u64,
}

/// Edit-mode authoring actions, expressed as data so a UI can map them to
/// its own menus without the core holding callbacks.
#[derive(Debug, Clone)]
pub enum Command {
    /// Merge a move at the edit cursor.
    AddMove(MoveSquares),
    /// Move the edit cursor to this move.
    SelectMove(MoveRef),
    /// Move the edit cursor back one ply.
    CursorBack,
    /// Drop this move and everything after it, in every line through it.
    DeleteFrom(MoveRef),
    /// Re-root so the line through this move becomes the main line.
    PromoteVariation(MoveRef),
}

#[derive(Debug, Clone)]
pub enum Event {
    /// The user dropped a piece on the board.
    UserMove(MoveSquares),
    /// The board finished animating the last position change.
    AnimationSettled,
    /// A scheduled opponent reply is due.
    OpponentTimer(TimerToken),

    /// Swap Learn and Practice while the current line is incomplete.
    ToggleMode,
    /// Practice: mark the origin squares of the expected replies.
    Hint,
    /// Practice/Learn: draw full arrows for the expected replies.
    Show,

    /// Explore: step back one move.
    Back,
    /// Explore: jump to the chapter start.
    ToStart,
    /// Resume training on a specific line (the opponent follows it).
    SelectLine(LineKey),
    /// Resume training on the first incomplete line.
    NextLine,
    /// Replay the line just finished.
    Replay,

    NextChapter,
    SelectChapter(usize),
    LoadLesson { id: String, lesson: Lesson },
    /// The active chapter's backing text changed externally.
    ChapterTextChanged { index: usize, text: String },

    EnterEdit,
    EditCommand(Command),
    SaveEdit,
    /// Leave edit mode; `discard` confirms dropping unsaved changes.
    LeaveEdit { discard: bool },
}
