//! Driver smoke test: real tokio timers carry the opponent reply through
//! the event pump.

mod common;

use std::time::Duration;

use repertoire_core::rules::StandardRules;
use repertoire_core::Lesson;
use shakmaty::Color;
use trainer_session::{
    Event, Feedback, PersistenceGateway, RenderingSurface, SessionConfig, SessionController,
    SessionDriver, SessionError,
};

struct NullBoard;

impl RenderingSurface for NullBoard {
    fn set_position(&mut self, _fen: &str) {}
    fn markers(&mut self, _squares: &[shakmaty::Square]) {}
    fn arrows(&mut self, _arrows: &[(shakmaty::Square, shakmaty::Square)]) {}
    fn clear_shapes(&mut self) {}
    fn feedback(&mut self, _feedback: &Feedback) {}
    fn confirm_discard(&mut self) {}
}

struct StaticGateway {
    lesson: Lesson,
}

impl PersistenceGateway for StaticGateway {
    fn load_lesson(&mut self, _id: &str) -> Result<Lesson, SessionError> {
        Ok(self.lesson.clone())
    }

    fn save_chapter_text(
        &mut self,
        _lesson_id: &str,
        _chapter_index: usize,
        _text: &str,
    ) -> Result<(), SessionError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_driver_delivers_opponent_reply() {
    let config = SessionConfig {
        opponent_delay: Duration::from_millis(5),
        rng_seed: Some(1),
        ..SessionConfig::default()
    };
    let controller = SessionController::new(Box::new(StandardRules), config);
    let gateway = StaticGateway {
        lesson: common::lesson(&["1. e4 e5 2. Nf3"], Color::White),
    };
    let mut driver = SessionDriver::new(controller, NullBoard, gateway);

    driver.load_lesson("lesson-1").unwrap();
    driver.run_until_quiet(Duration::from_millis(50)).await.unwrap();

    driver.dispatch(Event::UserMove(common::sq("e2e4"))).unwrap();
    driver.run_until_quiet(Duration::from_millis(50)).await.unwrap();

    let played = driver.controller().played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[1].notation, "e5");
}
