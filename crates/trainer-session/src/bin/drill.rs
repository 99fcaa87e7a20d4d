//! Self-drill CLI
//!
//! Loads a lesson (JSON) or a bare movetext chapter and replays every line
//! through the real controller and driver: the tool plays the student's
//! side by always choosing the first expected move, the controller
//! automates the opponent. Exercises the full stack end to end.
//!
//! Usage: drill <lesson.json | chapter.pgn> [--seed N] [--black]

use std::fs;
use std::path::Path;
use std::time::Duration;

use shakmaty::Color;
use tracing::{info, warn};

use repertoire_core::rules::StandardRules;
use repertoire_core::{Chapter, Lesson};
use trainer_session::{
    Event, Feedback, Mode, PersistenceGateway, RenderingSurface, SessionConfig,
    SessionController, SessionDriver, SessionError,
};

/// Surface that logs instead of drawing. No animation, so the driver
/// acknowledges position changes immediately.
struct ConsoleBoard;

impl RenderingSurface for ConsoleBoard {
    fn set_position(&mut self, fen: &str) {
        info!(%fen, "position");
    }

    fn markers(&mut self, squares: &[shakmaty::Square]) {
        info!(?squares, "markers");
    }

    fn arrows(&mut self, arrows: &[(shakmaty::Square, shakmaty::Square)]) {
        info!(?arrows, "arrows");
    }

    fn clear_shapes(&mut self) {}

    fn feedback(&mut self, feedback: &Feedback) {
        info!(?feedback, "feedback");
    }

    fn confirm_discard(&mut self) {
        warn!("unsaved edit changes");
    }
}

/// Loads lessons from disk: a `.json` file deserializes directly, anything
/// else is wrapped as a single-chapter lesson.
struct FileGateway {
    user_color: Color,
}

impl PersistenceGateway for FileGateway {
    fn load_lesson(&mut self, id: &str) -> Result<Lesson, SessionError> {
        let raw = fs::read_to_string(id)
            .map_err(|e| SessionError::Persistence(format!("read {id}: {e}")))?;
        if id.ends_with(".json") {
            serde_json::from_str(&raw)
                .map_err(|e| SessionError::Persistence(format!("parse {id}: {e}")))
        } else {
            let title = Path::new(id)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "chapter".to_string());
            Ok(Lesson {
                title: title.clone(),
                user_color: self.user_color,
                chapters: vec![Chapter { title, text: raw }],
                display_line: None,
            })
        }
    }

    fn save_chapter_text(
        &mut self,
        lesson_id: &str,
        chapter_index: usize,
        _text: &str,
    ) -> Result<(), SessionError> {
        info!(lesson_id, chapter_index, "save requested (drill keeps files untouched)");
        Ok(())
    }
}

fn parse_args() -> Option<(String, Option<u64>, Color)> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut path = None;
    let mut seed = None;
    let mut color = Color::White;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                seed = args.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "--black" => {
                color = Color::Black;
                i += 1;
            }
            other => {
                path = Some(other.to_string());
                i += 1;
            }
        }
    }
    path.map(|p| (p, seed, color))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
    let _ = dotenvy::dotenv();

    let Some((path, seed, color)) = parse_args() else {
        eprintln!("usage: drill <lesson.json | chapter.pgn> [--seed N] [--black]");
        std::process::exit(2);
    };

    let mut config = SessionConfig::from_env();
    if std::env::var("OPPONENT_DELAY_MS").is_err() {
        // Drilling does not need human pacing.
        config.opponent_delay = Duration::from_millis(25);
    }
    if seed.is_some() {
        config.rng_seed = seed;
    }
    let quiet = config.opponent_delay + Duration::from_millis(100);

    let controller = SessionController::new(Box::new(StandardRules), config);
    let mut driver = SessionDriver::new(controller, ConsoleBoard, FileGateway { user_color: color });
    driver.load_lesson(&path)?;

    let mut steps = 0u32;
    loop {
        driver.run_until_quiet(quiet).await?;
        steps += 1;
        if steps > 10_000 {
            warn!("drill did not converge, giving up");
            break;
        }

        let controller = driver.controller();
        match controller.mode() {
            Mode::Explore => {
                let done = controller
                    .line_index()
                    .map_or(true, |index| index.all_complete());
                if done {
                    break;
                }
                driver.dispatch(Event::NextLine)?;
            }
            Mode::Learn | Mode::Practice => {
                let played: Vec<_> = controller.played().iter().map(|m| m.squares).collect();
                let next = controller.line_index().and_then(|index| {
                    index
                        .expected_next_moves(&played, true)
                        .first()
                        .map(|m| m.squares)
                });
                match next {
                    Some(squares) => driver.dispatch(Event::UserMove(squares))?,
                    None => break,
                }
            }
            Mode::Edit => {
                warn!("chapter has no lines to drill");
                break;
            }
        }
    }

    let controller = driver.controller();
    if let Some(index) = controller.line_index() {
        info!(
            completed = index.stats().completed_count(),
            total = index.len(),
            "drill finished"
        );
    }
    Ok(())
}
