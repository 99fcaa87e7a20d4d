use std::collections::VecDeque;

use repertoire_core::rules::StandardRules;
use repertoire_core::{Chapter, Lesson, MoveSquares};
use shakmaty::Color;
use trainer_session::{Effect, Event, SessionConfig, SessionController, TimerToken};

pub fn controller(seed: u64) -> SessionController {
    let config = SessionConfig {
        rng_seed: Some(seed),
        ..SessionConfig::default()
    };
    SessionController::new(Box::new(StandardRules), config)
}

pub fn lesson(texts: &[&str], user_color: Color) -> Lesson {
    Lesson {
        title: "test lesson".to_string(),
        user_color,
        chapters: texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chapter {
                title: format!("Chapter {}", i + 1),
                text: text.to_string(),
            })
            .collect(),
        display_line: None,
    }
}

/// Dispatch an event and keep acknowledging board animations until the
/// controller goes quiet. Opponent timers are NOT fired automatically;
/// use [`fire_opponent`] when a test wants the reply.
pub fn drive(c: &mut SessionController, event: Event) -> Vec<Effect> {
    let mut log = Vec::new();
    let mut queue = VecDeque::from([event]);
    while let Some(ev) = queue.pop_front() {
        let effects = c.handle(ev).unwrap();
        for effect in &effects {
            if matches!(effect, Effect::SetPosition(_)) {
                queue.push_back(Event::AnimationSettled);
            }
        }
        log.extend(effects);
    }
    log
}

pub fn load(c: &mut SessionController, texts: &[&str], user_color: Color) -> Vec<Effect> {
    drive(
        c,
        Event::LoadLesson {
            id: "lesson-1".to_string(),
            lesson: lesson(texts, user_color),
        },
    )
}

/// Fire the most recently scheduled opponent timer from `log`.
pub fn fire_opponent(c: &mut SessionController, log: &[Effect]) -> Vec<Effect> {
    let token = last_timer(log).expect("no opponent reply scheduled");
    drive(c, Event::OpponentTimer(token))
}

pub fn last_timer(log: &[Effect]) -> Option<TimerToken> {
    log.iter().rev().find_map(|e| match e {
        Effect::ScheduleOpponent { token, .. } => Some(*token),
        _ => None,
    })
}

pub fn sq(token: &str) -> MoveSquares {
    token.parse().unwrap()
}

pub fn last_position(log: &[Effect]) -> Option<String> {
    log.iter().rev().find_map(|e| match e {
        Effect::SetPosition(fen) => Some(fen.clone()),
        _ => None,
    })
}
