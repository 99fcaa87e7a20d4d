//! Tokio event pump around the controller.
//!
//! One unbounded channel carries every event (user gestures, animation
//! acknowledgments, timer expiries) so the controller sees them in a
//! single serialized order. `ScheduleOpponent` effects become sleeping
//! tasks that post their token back into the same channel; the controller
//! discards tokens whose epoch is stale.

use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::SessionController;
use crate::effect::Effect;
use crate::error::SessionError;
use crate::event::Event;
use crate::gateway::{PersistenceGateway, RenderingSurface};

pub struct SessionDriver<S: RenderingSurface, P: PersistenceGateway> {
    controller: SessionController,
    surface: S,
    gateway: P,
    lesson_id: Option<String>,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl<S: RenderingSurface, P: PersistenceGateway> SessionDriver<S, P> {
    pub fn new(controller: SessionController, surface: S, gateway: P) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            controller,
            surface,
            gateway,
            lesson_id: None,
            tx,
            rx,
        }
    }

    /// Handle for surfaces and UIs that post events asynchronously.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Fetch a lesson through the gateway and hand it to the controller.
    pub fn load_lesson(&mut self, id: &str) -> Result<(), SessionError> {
        let lesson = self.gateway.load_lesson(id)?;
        self.lesson_id = Some(id.to_string());
        self.dispatch(Event::LoadLesson {
            id: id.to_string(),
            lesson,
        })
    }

    /// Run one event through the controller and apply its effects.
    pub fn dispatch(&mut self, event: Event) -> Result<(), SessionError> {
        let effects = self.controller.handle(event)?;
        self.apply_effects(effects)
    }

    fn apply_effects(&mut self, effects: Vec<Effect>) -> Result<(), SessionError> {
        for effect in effects {
            match effect {
                Effect::SetPosition(fen) => {
                    self.surface.set_position(&fen);
                    if !self.surface.animates() {
                        let _ = self.tx.send(Event::AnimationSettled);
                    }
                }
                Effect::Markers(squares) => self.surface.markers(&squares),
                Effect::Arrows(arrows) => self.surface.arrows(&arrows),
                Effect::ClearShapes => self.surface.clear_shapes(),
                Effect::Feedback(feedback) => self.surface.feedback(&feedback),
                Effect::ConfirmDiscard => self.surface.confirm_discard(),
                Effect::ScheduleOpponent { token, delay } => {
                    debug!(?token, ?delay, "scheduling opponent reply");
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Event::OpponentTimer(token));
                    });
                }
                Effect::PersistChapter {
                    chapter_index,
                    text,
                } => {
                    let Some(id) = self.lesson_id.clone() else {
                        continue;
                    };
                    self.gateway.save_chapter_text(&id, chapter_index, &text)?;
                }
            }
        }
        Ok(())
    }

    /// Pump events until none arrive for `idle`. The window must exceed
    /// the opponent delay, or the pump returns between reply timers.
    pub async fn run_until_quiet(&mut self, idle: std::time::Duration) -> Result<(), SessionError> {
        loop {
            match tokio::time::timeout(idle, self.rx.recv()).await {
                Ok(Some(event)) => self.dispatch(event)?,
                Ok(None) => break,
                Err(_) => break,
            }
        }
        Ok(())
    }
}
