//! External collaborators, consumed through narrow traits.

use repertoire_core::Lesson;
use shakmaty::Square;

use crate::effect::Feedback;
use crate::error::SessionError;

/// Board/UI sink for the controller's declarative output.
///
/// A surface that animates position changes must return `true` from
/// [`RenderingSurface::animates`] and post `Event::AnimationSettled`
/// through the driver's sender once the board has landed; otherwise the
/// driver acknowledges on its behalf right after `set_position`.
pub trait RenderingSurface: Send {
    fn set_position(&mut self, fen: &str);
    fn markers(&mut self, squares: &[Square]);
    fn arrows(&mut self, arrows: &[(Square, Square)]);
    fn clear_shapes(&mut self);
    fn feedback(&mut self, feedback: &Feedback);
    /// Ask the user to confirm dropping unsaved edit changes.
    fn confirm_discard(&mut self);

    fn animates(&self) -> bool {
        false
    }
}

/// Storage seam. The core only exchanges lesson data and chapter text
/// strings; where and how they persist is the host's business.
pub trait PersistenceGateway: Send {
    fn load_lesson(&mut self, id: &str) -> Result<Lesson, SessionError>;
    fn save_chapter_text(
        &mut self,
        lesson_id: &str,
        chapter_index: usize,
        text: &str,
    ) -> Result<(), SessionError>;
}
