//! Declarative outputs of the session controller.
//!
//! The controller never touches a drawing or storage API; it emits these
//! and the driver (or any other host) maps them onto the rendering surface,
//! timers and the persistence gateway.

use std::time::Duration;

use repertoire_core::LineKey;
use shakmaty::Square;

use crate::event::TimerToken;

/// Training feedback surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// The move matches no curriculum line; it will be rolled back.
    Incorrect,
    /// The move is book, but only on already-completed lines while other
    /// material is still open here; it will be rolled back silently.
    AlternativeRequired,
    LineComplete(LineKey),
    ChapterComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Animate the board to this FEN. The host must post
    /// `Event::AnimationSettled` once the animation finished.
    SetPosition(String),
    /// Highlight these squares.
    Markers(Vec<Square>),
    /// Draw these from/to arrows.
    Arrows(Vec<(Square, Square)>),
    ClearShapes,
    Feedback(Feedback),
    /// Start a timer and post `Event::OpponentTimer(token)` when it fires.
    ScheduleOpponent { token: TimerToken, delay: Duration },
    /// Unsaved edit changes exist; the host must ask before leaving.
    ConfirmDiscard,
    /// Persist the chapter text (edit-mode save).
    PersistChapter { chapter_index: usize, text: String },
}
