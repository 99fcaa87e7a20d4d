//! The session state machine.
//!
//! One controller owns the active chapter's tree and line index and drives
//! the four practice modes on top of them. It is advanced only through
//! [`SessionController::handle`]; timers and animation acknowledgments come
//! back in as events, and everything the outside world should do leaves as
//! [`Effect`]s. Work that must wait for the board ("after the current
//! animation") sits in a single FIFO of pending continuations, drained
//! exactly once per `AnimationSettled`; entries and opponent timers carry
//! an epoch and are dropped when the mode, chapter or lesson changed since
//! they were queued.

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shakmaty::Color;
use tracing::{debug, info, warn};

use repertoire_core::rules::{RulesEngine, START_POSITION};
use repertoire_core::{
    Chapter, CoreError, Lesson, Line, LineIndex, LineKey, LineMove, LineStats, MoveRef,
    MoveSquares, MoveTree,
};

use crate::config::SessionConfig;
use crate::effect::{Effect, Feedback};
use crate::error::SessionError;
use crate::event::{Command, Event, TimerToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Learn,
    Practice,
    Explore,
    Edit,
}

impl Mode {
    /// Learn and Practice check correctness and automate the opponent;
    /// Explore and Edit do not, and are never fallback targets.
    pub fn is_training(self) -> bool {
        matches!(self, Mode::Learn | Mode::Practice)
    }
}

/// Edit-mode working state: every curriculum line merged into one tree the
/// author can reshape, plus the ordered line identities of the last-saved
/// chapter for unsaved-change detection (order matters: promoting a
/// variation changes the text without changing the identity set).
struct EditState {
    tree: MoveTree,
    cursor: Option<MoveRef>,
    saved_keys: Vec<LineKey>,
}

struct ActiveLesson {
    id: String,
    lesson: Lesson,
    chapter: usize,
    tree: MoveTree,
    index: LineIndex,
    /// Completion stats of chapters visited earlier in this lesson.
    stats_stash: HashMap<usize, LineStats>,
    /// Moves currently standing on the board, chapter start first.
    played: Vec<LineMove>,
    /// Verified-correct frontier of the current attempt; hints are refused
    /// once the board is past it.
    line_progress: usize,
    /// Line the opponent follows when the user replays a known attempt.
    pinned: Option<LineKey>,
    last_completed: Option<LineKey>,
    edit: Option<EditState>,
}

/// Work deferred until the in-flight board animation settles.
enum Pending {
    /// Roll the board back to this position (wrong-move handling).
    Revert(String),
    /// Start the opponent reply timer.
    ScheduleOpponent,
    /// Learn-mode auto-reveal of expected origin squares.
    RevealHints,
}

fn path_tokens(played: &[LineMove]) -> Vec<MoveSquares> {
    played.iter().map(|m| m.squares).collect()
}

enum Verdict {
    Wrong,
    AlternativeRequired,
    Apply,
}

pub struct SessionController {
    rules: Box<dyn RulesEngine>,
    config: SessionConfig,
    rng: StdRng,
    mode: Mode,
    fallback: Mode,
    epoch: u64,
    timer_seq: u64,
    opponent_timer: Option<TimerToken>,
    animating: bool,
    pending: VecDeque<(u64, Pending)>,
    /// Last-used training mode per lesson id, for reconciliation.
    last_modes: HashMap<String, Mode>,
    active: Option<ActiveLesson>,
}

impl SessionController {
    pub fn new(rules: Box<dyn RulesEngine>, config: SessionConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rules,
            config,
            rng,
            mode: Mode::Learn,
            fallback: Mode::Learn,
            epoch: 0,
            timer_seq: 0,
            opponent_timer: None,
            animating: false,
            pending: VecDeque::new(),
            last_modes: HashMap::new(),
            active: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn fallback_mode(&self) -> Mode {
        self.fallback
    }

    pub fn chapter(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.chapter)
    }

    pub fn user_color(&self) -> Option<Color> {
        self.active.as_ref().map(|a| a.lesson.user_color)
    }

    pub fn played(&self) -> &[LineMove] {
        self.active.as_ref().map_or(&[], |a| a.played.as_slice())
    }

    pub fn line_index(&self) -> Option<&LineIndex> {
        self.active.as_ref().map(|a| &a.index)
    }

    pub fn tree(&self) -> Option<&MoveTree> {
        self.active.as_ref().map(|a| &a.tree)
    }

    pub fn edit_tree(&self) -> Option<&MoveTree> {
        self.active.as_ref().and_then(|a| a.edit.as_ref()).map(|e| &e.tree)
    }

    /// FEN currently on the board: the edit cursor's position in Edit mode,
    /// otherwise the last played move's.
    pub fn current_position(&self) -> String {
        let Some(active) = &self.active else {
            return START_POSITION.to_string();
        };
        if self.mode == Mode::Edit {
            if let Some(edit) = &active.edit {
                return match edit.cursor.and_then(|r| edit.tree.payload(r).ok()) {
                    Some(payload) => payload.position.clone(),
                    None => START_POSITION.to_string(),
                };
            }
        }
        match active.played.last() {
            Some(mv) => mv.position.clone(),
            None => START_POSITION.to_string(),
        }
    }

    fn side_to_move(&self) -> Color {
        let len = self.active.as_ref().map_or(0, |a| a.played.len());
        if len % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    fn user_turn(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |a| a.lesson.user_color == self.side_to_move())
    }

    /// Per-move actions a UI can offer while editing.
    pub fn commands_for(&self, r: MoveRef) -> Vec<Command> {
        let Some(edit) = self.active.as_ref().and_then(|a| a.edit.as_ref()) else {
            return Vec::new();
        };
        let mut out = vec![Command::SelectMove(r), Command::DeleteFrom(r)];
        if let Ok(false) = edit.tree.is_main_line(r) {
            out.push(Command::PromoteVariation(r));
        }
        out
    }

    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>, SessionError> {
        match event {
            Event::UserMove(squares) => self.user_move(squares),
            Event::AnimationSettled => Ok(self.animation_settled()),
            Event::OpponentTimer(token) => self.opponent_reply(token),
            Event::ToggleMode => self.toggle_mode(),
            Event::Hint => self.hint(false),
            Event::Show => self.hint(true),
            Event::Back => self.navigate_back(),
            Event::ToStart => self.navigate_to_start(),
            Event::SelectLine(key) => self.start_line(Some(key)),
            Event::NextLine => self.start_line(None),
            Event::Replay => self.replay(),
            Event::NextChapter => {
                let next = self
                    .active
                    .as_ref()
                    .map(|a| a.chapter + 1)
                    .ok_or(SessionError::NoLesson)?;
                self.select_chapter(next)
            }
            Event::SelectChapter(index) => self.select_chapter(index),
            Event::LoadLesson { id, lesson } => self.load_lesson(id, lesson),
            Event::ChapterTextChanged { index, text } => self.chapter_text_changed(index, text),
            Event::EnterEdit => self.enter_edit(),
            Event::EditCommand(cmd) => self.edit_command(cmd),
            Event::SaveEdit => self.save_edit(),
            Event::LeaveEdit { discard } => self.leave_edit(discard),
        }
    }

    // ------------------------------------------------------------------
    // Animation queue and timers
    // ------------------------------------------------------------------

    fn bump_epoch(&mut self, reason: &str) {
        self.epoch += 1;
        self.opponent_timer = None;
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), reason, "clearing stale continuations");
            self.pending.clear();
        }
    }

    fn next_token(&mut self) -> TimerToken {
        self.timer_seq += 1;
        TimerToken {
            epoch: self.epoch,
            seq: self.timer_seq,
        }
    }

    fn emit_position(&mut self, fen: String, effects: &mut Vec<Effect>) {
        self.animating = true;
        effects.push(Effect::SetPosition(fen));
    }

    /// Run `pending` now if the board is idle, else after the animation.
    fn queue(&mut self, pending: Pending, effects: &mut Vec<Effect>) {
        if self.animating {
            self.pending.push_back((self.epoch, pending));
        } else {
            self.realize(pending, effects);
        }
    }

    fn realize(&mut self, pending: Pending, effects: &mut Vec<Effect>) {
        match pending {
            Pending::Revert(fen) => {
                self.emit_position(fen, effects);
                if let Some(active) = self.active.as_mut() {
                    active.line_progress = active.played.len();
                }
                self.queue_followups(effects);
            }
            Pending::ScheduleOpponent => {
                // The user may have played the reply before the animation
                // settled.
                if self.user_turn() {
                    return;
                }
                let token = self.next_token();
                self.opponent_timer = Some(token);
                effects.push(Effect::ScheduleOpponent {
                    token,
                    delay: self.config.opponent_delay,
                });
            }
            Pending::RevealHints => {
                effects.extend(self.marker_effects());
            }
        }
    }

    fn animation_settled(&mut self) -> Vec<Effect> {
        self.animating = false;
        // Snapshot: continuations queued while these run belong to the
        // next animation cycle.
        let drained = std::mem::take(&mut self.pending);
        let mut effects = Vec::new();
        for (epoch, pending) in drained {
            if epoch != self.epoch {
                debug!("dropping stale continuation");
                continue;
            }
            self.realize(pending, &mut effects);
        }
        effects
    }

    /// Queue whatever the new position calls for: the opponent reply timer
    /// on the non-user turn, Learn-mode auto-reveal on the user's turn.
    fn queue_followups(&mut self, effects: &mut Vec<Effect>) {
        if !self.mode.is_training() {
            return;
        }
        let (has_open_material, user_turn) = {
            let Some(active) = &self.active else { return };
            let played = path_tokens(&active.played);
            // A pinned replay keeps going even on completed lines.
            let pinned_continues = active
                .pinned
                .as_ref()
                .and_then(|key| active.index.line(key))
                .map_or(false, |line| {
                    line.matches_prefix(&played) && line.len() > played.len()
                });
            let open =
                pinned_continues || !active.index.expected_next_moves(&played, true).is_empty();
            (open, self.user_turn())
        };
        if !has_open_material {
            return;
        }
        if user_turn {
            if self.mode == Mode::Learn {
                self.queue(Pending::RevealHints, effects);
            }
        } else {
            self.queue(Pending::ScheduleOpponent, effects);
        }
    }

    fn marker_effects(&self) -> Vec<Effect> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        let played = path_tokens(&active.played);
        let expected = active.index.expected_next_moves(&played, true);
        if expected.is_empty() {
            return Vec::new();
        }
        let mut squares = Vec::new();
        for mv in expected {
            if !squares.contains(&mv.squares.from) {
                squares.push(mv.squares.from);
            }
        }
        vec![Effect::Markers(squares)]
    }

    fn arrow_effects(&self) -> Vec<Effect> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        let played = path_tokens(&active.played);
        let expected = active.index.expected_next_moves(&played, true);
        if expected.is_empty() {
            return Vec::new();
        }
        let arrows = expected
            .iter()
            .map(|mv| (mv.squares.from, mv.squares.to))
            .collect();
        vec![Effect::Arrows(arrows)]
    }

    // ------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------

    fn user_move(&mut self, squares: MoveSquares) -> Result<Vec<Effect>, SessionError> {
        match self.mode {
            Mode::Edit => return self.edit_command(Command::AddMove(squares)),
            Mode::Explore => return self.explore_move(squares),
            Mode::Learn | Mode::Practice => {}
        }
        // The user may also play the book reply for the other side
        // themselves; a correct one simply pre-empts the opponent timer.
        let mover = self.side_to_move();
        if self.active.is_none() {
            return Err(SessionError::NoLesson);
        }
        let pre = self.current_position();
        let validated = match self.rules.validate(&pre, squares) {
            Ok(v) => v,
            Err(CoreError::Illegal(token)) => {
                // Not a training failure; the move is simply not applied.
                debug!(%token, "illegal move");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(active) = self.active.as_mut() else {
            return Err(SessionError::NoLesson);
        };
        let mv = LineMove {
            ply: active.played.len() as u32 + 1,
            color: mover,
            notation: validated.notation,
            squares,
            position: validated.position,
        };
        let mut path = path_tokens(&active.played);
        path.push(squares);

        let verdict = {
            if active.index.relevant_lines(&path, false).is_empty() {
                Verdict::Wrong
            } else if active.index.relevant_lines(&path, true).is_empty() {
                // Only completed lines continue with this move. Replaying a
                // pinned line is fine; dodging open material here is not.
                let follows_pin = active
                    .pinned
                    .as_ref()
                    .and_then(|key| active.index.line(key))
                    .map_or(false, |line| line.matches_prefix(&path));
                let pre_path = path_tokens(&active.played);
                if !follows_pin && !active.index.relevant_lines(&pre_path, true).is_empty() {
                    Verdict::AlternativeRequired
                } else {
                    Verdict::Apply
                }
            } else {
                Verdict::Apply
            }
        };

        match verdict {
            Verdict::Wrong => {
                info!(token = %squares.token(), "incorrect move");
                let mut effects = Vec::new();
                self.emit_position(mv.position.clone(), &mut effects);
                effects.push(Effect::Feedback(Feedback::Incorrect));
                self.pending.push_back((self.epoch, Pending::Revert(pre)));
                Ok(effects)
            }
            Verdict::AlternativeRequired => {
                info!(token = %squares.token(), "alternative move required");
                let mut effects = Vec::new();
                self.emit_position(mv.position.clone(), &mut effects);
                effects.push(Effect::Feedback(Feedback::AlternativeRequired));
                self.pending.push_back((self.epoch, Pending::Revert(pre)));
                Ok(effects)
            }
            Verdict::Apply => self.apply_move(mv),
        }
    }

    /// Put a verified (or automated) move on the board, then either close
    /// out a completed line or queue the next follow-up.
    fn apply_move(&mut self, mv: LineMove) -> Result<Vec<Effect>, SessionError> {
        // Any applied move supersedes a reply already on the clock.
        self.opponent_timer = None;
        let fen = mv.position.clone();
        let completion = {
            let Some(active) = self.active.as_mut() else {
                return Err(SessionError::NoLesson);
            };
            active.played.push(mv);
            active.line_progress = active.played.len();
            let path = path_tokens(&active.played);
            match active.index.completed_line(&path).map(|l| l.key()) {
                Some(key) => {
                    active.index.mark_complete(&key);
                    active.last_completed = Some(key.clone());
                    Some((key, active.index.all_complete()))
                }
                None => None,
            }
        };

        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(fen, &mut effects);
        match completion {
            Some((key, chapter_done)) => {
                info!(line = %key, "line complete");
                effects.push(Effect::Feedback(Feedback::LineComplete(key)));
                if chapter_done {
                    info!("chapter complete");
                    effects.push(Effect::Feedback(Feedback::ChapterComplete));
                }
                self.bump_epoch("line completed");
                self.set_mode(Mode::Explore);
            }
            None => self.queue_followups(&mut effects),
        }
        Ok(effects)
    }

    fn opponent_reply(&mut self, token: TimerToken) -> Result<Vec<Effect>, SessionError> {
        if token.epoch != self.epoch || self.opponent_timer != Some(token) {
            warn!("stale opponent timer ignored");
            return Ok(Vec::new());
        }
        self.opponent_timer = None;
        if !self.mode.is_training() || self.user_turn() {
            return Ok(Vec::new());
        }
        let mv = {
            let Some(active) = &self.active else {
                return Err(SessionError::NoLesson);
            };
            let played = path_tokens(&active.played);
            let candidates: Vec<LineMove> = active
                .index
                .expected_next_moves(&played, true)
                .into_iter()
                .cloned()
                .collect();
            // A pinned replay may run along a completed line.
            let pinned = active
                .pinned
                .as_ref()
                .and_then(|key| active.index.line(key))
                .filter(|line| line.matches_prefix(&played))
                .and_then(|line| line.moves().get(played.len()))
                .cloned();
            match pinned {
                Some(mv) => mv,
                None => {
                    if candidates.is_empty() {
                        return Ok(Vec::new());
                    }
                    candidates[self.rng.gen_range(0..candidates.len())].clone()
                }
            }
        };
        debug!(token = %mv.squares.token(), "opponent reply");
        self.apply_move(mv)
    }

    fn explore_move(&mut self, squares: MoveSquares) -> Result<Vec<Effect>, SessionError> {
        let pre = self.current_position();
        let validated = match self.rules.validate(&pre, squares) {
            Ok(v) => v,
            Err(CoreError::Illegal(token)) => {
                debug!(%token, "illegal move");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let Some(active) = self.active.as_mut() else {
            return Err(SessionError::NoLesson);
        };
        let ply = active.played.len() as u32 + 1;
        let mv = LineMove {
            ply,
            color: if ply % 2 == 1 { Color::White } else { Color::Black },
            notation: validated.notation,
            squares,
            position: validated.position,
        };
        let fen = mv.position.clone();
        active.played.push(mv);
        let mut effects = Vec::new();
        self.emit_position(fen, &mut effects);
        Ok(effects)
    }

    // ------------------------------------------------------------------
    // Hints and navigation
    // ------------------------------------------------------------------

    fn hint(&mut self, arrows: bool) -> Result<Vec<Effect>, SessionError> {
        let allowed = match self.mode {
            Mode::Practice => true,
            // Learn auto-reveals origins; arrows stay on demand.
            Mode::Learn => arrows,
            Mode::Explore | Mode::Edit => false,
        };
        if !allowed || !self.user_turn() {
            return Ok(Vec::new());
        }
        let Some(active) = &self.active else {
            return Err(SessionError::NoLesson);
        };
        if active.played.len() != active.line_progress {
            debug!("hint refused past the unsolved position");
            return Ok(Vec::new());
        }
        Ok(if arrows {
            self.arrow_effects()
        } else {
            self.marker_effects()
        })
    }

    fn navigate_back(&mut self) -> Result<Vec<Effect>, SessionError> {
        if self.mode != Mode::Explore {
            return Ok(Vec::new());
        }
        let Some(active) = self.active.as_mut() else {
            return Err(SessionError::NoLesson);
        };
        if active.played.pop().is_none() {
            return Ok(Vec::new());
        }
        let fen = active
            .played
            .last()
            .map(|m| m.position.clone())
            .unwrap_or_else(|| START_POSITION.to_string());
        let mut effects = Vec::new();
        self.emit_position(fen, &mut effects);
        Ok(effects)
    }

    fn navigate_to_start(&mut self) -> Result<Vec<Effect>, SessionError> {
        if self.mode != Mode::Explore {
            return Ok(Vec::new());
        }
        let Some(active) = self.active.as_mut() else {
            return Err(SessionError::NoLesson);
        };
        active.played.clear();
        let mut effects = Vec::new();
        self.emit_position(START_POSITION.to_string(), &mut effects);
        Ok(effects)
    }

    // ------------------------------------------------------------------
    // Mode transitions
    // ------------------------------------------------------------------

    fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            info!(from = ?self.mode, to = ?mode, "mode transition");
        }
        self.mode = mode;
        if mode.is_training() {
            self.fallback = mode;
            if let Some(active) = &self.active {
                self.last_modes.insert(active.id.clone(), mode);
            }
        }
    }

    fn toggle_mode(&mut self) -> Result<Vec<Effect>, SessionError> {
        if !self.mode.is_training() {
            return Ok(Vec::new());
        }
        let next = match self.mode {
            Mode::Learn => Mode::Practice,
            _ => Mode::Learn,
        };
        self.bump_epoch("mode toggled");
        self.set_mode(next);
        let mut effects = vec![Effect::ClearShapes];
        self.queue_followups(&mut effects);
        Ok(effects)
    }

    /// Leave Explore and resume training, optionally pinning a line for
    /// the opponent to follow.
    fn start_line(&mut self, requested: Option<LineKey>) -> Result<Vec<Effect>, SessionError> {
        let pin = {
            let Some(active) = &self.active else {
                return Err(SessionError::NoLesson);
            };
            match requested {
                Some(key) => {
                    if active.index.line(&key).is_none() {
                        warn!(line = %key, "unknown line requested");
                        return Ok(Vec::new());
                    }
                    Some(key)
                }
                None => active.index.first_incomplete().map(|l| l.key()),
            }
        };
        self.bump_epoch("line restart");
        if let Some(active) = self.active.as_mut() {
            active.pinned = pin;
            active.played.clear();
            active.line_progress = 0;
        }
        let fallback = self.fallback;
        self.set_mode(fallback);
        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(START_POSITION.to_string(), &mut effects);
        self.queue_followups(&mut effects);
        Ok(effects)
    }

    fn replay(&mut self) -> Result<Vec<Effect>, SessionError> {
        let pin = {
            let Some(active) = &self.active else {
                return Err(SessionError::NoLesson);
            };
            active.last_completed.clone().or_else(|| active.pinned.clone())
        };
        self.start_line(pin)
    }

    // ------------------------------------------------------------------
    // Lesson and chapter reconciliation
    // ------------------------------------------------------------------

    fn load_lesson(&mut self, id: String, mut lesson: Lesson) -> Result<Vec<Effect>, SessionError> {
        if let Some(blocked) = self.edit_guard() {
            return Ok(blocked);
        }
        if lesson.chapters.is_empty() {
            lesson.chapters.push(Chapter {
                title: "Chapter 1".to_string(),
                text: String::new(),
            });
        }
        let text = lesson.chapters[0].text.clone();
        let tree = self.rules.parse(&text)?;
        let index = LineIndex::from_tree(&tree);
        self.bump_epoch("lesson loaded");
        info!(lesson = %id, chapters = lesson.chapters.len(), "lesson loaded");
        self.active = Some(ActiveLesson {
            id: id.clone(),
            lesson,
            chapter: 0,
            tree,
            index,
            stats_stash: HashMap::new(),
            played: Vec::new(),
            line_progress: 0,
            pinned: None,
            last_completed: None,
            edit: None,
        });
        self.reconcile_mode(&id)?;
        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(START_POSITION.to_string(), &mut effects);
        self.queue_followups(&mut effects);
        Ok(effects)
    }

    fn select_chapter(&mut self, target: usize) -> Result<Vec<Effect>, SessionError> {
        if let Some(blocked) = self.edit_guard() {
            return Ok(blocked);
        }
        let text = {
            let Some(active) = &self.active else {
                return Err(SessionError::NoLesson);
            };
            let Some(chapter) = active.lesson.chapters.get(target) else {
                return Err(SessionError::ChapterOutOfRange(target));
            };
            chapter.text.clone()
        };
        let tree = self.rules.parse(&text)?;
        let mut index = LineIndex::from_tree(&tree);
        self.bump_epoch("chapter switch");
        let lesson_id = {
            let Some(active) = self.active.as_mut() else {
                return Err(SessionError::NoLesson);
            };
            // Same lesson, same text: progress survives the switch.
            let stats = active.index.stats().clone();
            active.stats_stash.insert(active.chapter, stats);
            if let Some(saved) = active.stats_stash.get(&target) {
                index.restore_stats(saved);
            }
            active.chapter = target;
            active.tree = tree;
            active.index = index;
            active.played.clear();
            active.line_progress = 0;
            active.pinned = None;
            active.last_completed = None;
            active.edit = None;
            active.id.clone()
        };
        info!(chapter = target, "chapter selected");
        self.reconcile_mode(&lesson_id)?;
        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(START_POSITION.to_string(), &mut effects);
        self.queue_followups(&mut effects);
        Ok(effects)
    }

    fn chapter_text_changed(
        &mut self,
        index: usize,
        text: String,
    ) -> Result<Vec<Effect>, SessionError> {
        let active_chapter = {
            let Some(active) = self.active.as_mut() else {
                return Err(SessionError::NoLesson);
            };
            let Some(chapter) = active.lesson.chapters.get_mut(index) else {
                return Err(SessionError::ChapterOutOfRange(index));
            };
            chapter.text = text.clone();
            // New text invalidates any stashed progress for that chapter.
            active.stats_stash.remove(&index);
            active.chapter
        };
        if index != active_chapter {
            return Ok(Vec::new());
        }
        let tree = self.rules.parse(&text)?;
        let new_index = LineIndex::from_tree(&tree);
        self.bump_epoch("chapter text changed");
        let lesson_id = {
            let Some(active) = self.active.as_mut() else {
                return Err(SessionError::NoLesson);
            };
            active.tree = tree;
            active.index = new_index;
            active.played.clear();
            active.line_progress = 0;
            active.pinned = None;
            active.last_completed = None;
            active.edit = None;
            active.id.clone()
        };
        info!(chapter = index, "chapter text changed, rebuilt");
        self.reconcile_mode(&lesson_id)?;
        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(START_POSITION.to_string(), &mut effects);
        self.queue_followups(&mut effects);
        Ok(effects)
    }

    /// Pick the mode for a freshly (re)built chapter: Edit when it has no
    /// lines, else the lesson's last-used training mode, else Learn.
    fn reconcile_mode(&mut self, lesson_id: &str) -> Result<(), SessionError> {
        let empty = self.active.as_ref().map_or(true, |a| a.index.is_empty());
        if empty {
            self.enter_edit_state()?;
        } else {
            let mode = self.last_modes.get(lesson_id).copied().unwrap_or(Mode::Learn);
            self.set_mode(mode);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edit mode
    // ------------------------------------------------------------------

    /// ConfirmDiscard when unsaved edit changes would be lost.
    fn edit_guard(&self) -> Option<Vec<Effect>> {
        if self.mode != Mode::Edit {
            return None;
        }
        let edit = self.active.as_ref()?.edit.as_ref()?;
        let current: Vec<LineKey> = edit.tree.lines().iter().map(|l| l.key()).collect();
        if current != edit.saved_keys {
            Some(vec![Effect::ConfirmDiscard])
        } else {
            None
        }
    }

    fn enter_edit_state(&mut self) -> Result<(), SessionError> {
        {
            let Some(active) = self.active.as_mut() else {
                return Err(SessionError::NoLesson);
            };
            let tree = MoveTree::from_lines(active.index.lines().iter())?;
            let saved_keys = active.index.keys();
            active.edit = Some(EditState {
                tree,
                cursor: None,
                saved_keys,
            });
        }
        self.set_mode(Mode::Edit);
        Ok(())
    }

    fn enter_edit(&mut self) -> Result<Vec<Effect>, SessionError> {
        if !self.config.allow_edit {
            debug!("edit not permitted");
            return Ok(Vec::new());
        }
        if self.mode == Mode::Edit {
            return Ok(Vec::new());
        }
        if self.active.is_none() {
            return Err(SessionError::NoLesson);
        }
        self.bump_epoch("entering edit");
        self.enter_edit_state()?;
        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(START_POSITION.to_string(), &mut effects);
        Ok(effects)
    }

    fn edit_command(&mut self, cmd: Command) -> Result<Vec<Effect>, SessionError> {
        if self.mode != Mode::Edit {
            return Ok(Vec::new());
        }
        match cmd {
            Command::AddMove(squares) => self.edit_add_move(squares),
            Command::SelectMove(r) => {
                let fen = {
                    let Some(edit) = self.active.as_mut().and_then(|a| a.edit.as_mut()) else {
                        return Ok(Vec::new());
                    };
                    let payload = edit.tree.payload(r)?;
                    let fen = payload.position.clone();
                    edit.cursor = Some(r);
                    fen
                };
                let mut effects = Vec::new();
                self.emit_position(fen, &mut effects);
                Ok(effects)
            }
            Command::CursorBack => {
                let fen = {
                    let Some(edit) = self.active.as_mut().and_then(|a| a.edit.as_mut()) else {
                        return Ok(Vec::new());
                    };
                    let Some(cursor) = edit.cursor else {
                        return Ok(Vec::new());
                    };
                    edit.cursor = edit.tree.previous(cursor)?;
                    match edit.cursor.and_then(|r| edit.tree.payload(r).ok()) {
                        Some(payload) => payload.position.clone(),
                        None => START_POSITION.to_string(),
                    }
                };
                let mut effects = Vec::new();
                self.emit_position(fen, &mut effects);
                Ok(effects)
            }
            Command::DeleteFrom(r) => {
                {
                    let Some(edit) = self.active.as_mut().and_then(|a| a.edit.as_mut()) else {
                        return Ok(Vec::new());
                    };
                    edit.tree = edit.tree.delete(r)?;
                    // Refs into the old arena are stale now.
                    edit.cursor = None;
                }
                let mut effects = Vec::new();
                self.emit_position(START_POSITION.to_string(), &mut effects);
                Ok(effects)
            }
            Command::PromoteVariation(r) => {
                let fen = {
                    let Some(edit) = self.active.as_mut().and_then(|a| a.edit.as_mut()) else {
                        return Ok(Vec::new());
                    };
                    let (tree, promoted) = edit.tree.promote(r)?;
                    edit.tree = tree;
                    edit.cursor = Some(promoted);
                    edit.tree.payload(promoted)?.position.clone()
                };
                let mut effects = Vec::new();
                self.emit_position(fen, &mut effects);
                Ok(effects)
            }
        }
    }

    fn edit_add_move(&mut self, squares: MoveSquares) -> Result<Vec<Effect>, SessionError> {
        let pre = self.current_position();
        let validated = match self.rules.validate(&pre, squares) {
            Ok(v) => v,
            Err(CoreError::Illegal(token)) => {
                debug!(%token, "illegal move");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let fen = {
            let Some(edit) = self.active.as_mut().and_then(|a| a.edit.as_mut()) else {
                return Ok(Vec::new());
            };
            let mut moves = match edit.cursor {
                Some(r) => edit.tree.path_to(r)?,
                None => Vec::new(),
            };
            let ply = moves.len() as u32 + 1;
            let mv = LineMove {
                ply,
                color: if ply % 2 == 1 { Color::White } else { Color::Black },
                notation: validated.notation,
                squares,
                position: validated.position,
            };
            let fen = mv.position.clone();
            moves.push(mv);
            let leaf = edit.tree.merge(&Line::new(moves))?;
            edit.cursor = Some(leaf);
            fen
        };
        let mut effects = Vec::new();
        self.emit_position(fen, &mut effects);
        Ok(effects)
    }

    fn save_edit(&mut self) -> Result<Vec<Effect>, SessionError> {
        if self.mode != Mode::Edit {
            return Ok(Vec::new());
        }
        let (chapter_index, text) = {
            let Some(active) = &self.active else {
                return Err(SessionError::NoLesson);
            };
            let Some(edit) = active.edit.as_ref() else {
                return Ok(Vec::new());
            };
            (active.chapter, edit.tree.render_text())
        };
        // Saving is a text change: the live tree and index rebuild from it.
        let tree = self.rules.parse(&text)?;
        let index = LineIndex::from_tree(&tree);
        {
            let Some(active) = self.active.as_mut() else {
                return Err(SessionError::NoLesson);
            };
            active.lesson.chapters[chapter_index].text = text.clone();
            active.stats_stash.remove(&chapter_index);
            active.tree = tree;
            active.index = index;
            if let Some(edit) = active.edit.as_mut() {
                edit.saved_keys = active.index.keys();
            }
        }
        info!(chapter = chapter_index, "chapter saved");
        Ok(vec![Effect::PersistChapter {
            chapter_index,
            text,
        }])
    }

    fn leave_edit(&mut self, discard: bool) -> Result<Vec<Effect>, SessionError> {
        if self.mode != Mode::Edit {
            return Ok(Vec::new());
        }
        if !discard {
            if let Some(blocked) = self.edit_guard() {
                return Ok(blocked);
            }
        }
        let has_saved_lines = {
            let Some(active) = &self.active else {
                return Err(SessionError::NoLesson);
            };
            !active.index.is_empty()
        };
        if !has_saved_lines {
            debug!("cannot leave edit before a line is saved");
            return Ok(Vec::new());
        }
        if let Some(active) = self.active.as_mut() {
            active.edit = None;
            active.played.clear();
            active.line_progress = 0;
            active.pinned = None;
        }
        self.bump_epoch("leaving edit");
        let fallback = self.fallback;
        self.set_mode(fallback);
        let mut effects = vec![Effect::ClearShapes];
        self.emit_position(START_POSITION.to_string(), &mut effects);
        self.queue_followups(&mut effects);
        Ok(effects)
    }
}
