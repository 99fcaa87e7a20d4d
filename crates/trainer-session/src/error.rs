//! Session error types

use repertoire_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("no lesson loaded")]
    NoLesson,

    #[error("chapter index {0} out of range")]
    ChapterOutOfRange(usize),

    #[error("persistence error: {0}")]
    Persistence(String),
}
