//! App: terminal init, main loop, timers, key and mouse handling, effect dispatch.

use crate::GameConfig;
use crate::authority::{Backend, BackendError, LocalAuthority, Outcome};
use crate::bonus::Bonus;
use crate::counters::combo_message;
use crate::grid::BlockId;
use crate::highscores::{self, Records};
use crate::input::{Action, key_to_action};
use crate::journal::Journal;
use crate::phase::Phase;
use crate::session::{Effect, Event, Session};
use crate::theme::Theme;
use crate::ui::{self, ClearFx, View};
use anyhow::{Context, Result};
use crossterm::event::{
    self, Event as TermEvent, KeyEventKind, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::DefaultTerminal;
use ratatui::layout::Rect;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a combo banner stays on the board.
const BANNER_MS: u64 = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Playing,
    GameOver,
    QuitMenu(QuitOption),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitOption {
    Resume,
    NewGame,
    Exit,
}

impl QuitOption {
    fn next(self) -> Self {
        match self {
            Self::Resume => Self::NewGame,
            Self::NewGame => Self::Exit,
            Self::Exit => Self::Resume,
        }
    }

    fn prev(self) -> Self {
        match self {
            Self::Resume => Self::Exit,
            Self::NewGame => Self::Resume,
            Self::Exit => Self::NewGame,
        }
    }
}

/// One block's drop animation between two grid rows.
#[derive(Debug, Clone, Copy)]
struct Fall {
    from: f32,
    to: usize,
    started: Instant,
}

impl Fall {
    fn row_at(&self, now: Instant, duration: Duration) -> f32 {
        let t = if duration.is_zero() {
            1.0
        } else {
            (now.saturating_duration_since(self.started).as_secs_f32() / duration.as_secs_f32())
                .min(1.0)
        };
        self.from + (self.to as f32 - self.from) * t
    }
}

pub struct App {
    config: GameConfig,
    theme: Theme,
    journal: Journal,
    backend: Box<dyn Backend>,
    backend_lost: bool,
    session: Session,
    screen: Screen,
    games: u32,
    cursor: (usize, usize),
    /// Offset between the pointer column and the grabbed block's left edge.
    grab_offset: usize,
    next_tick: Option<Instant>,
    busy_release: Option<Instant>,
    falls: HashMap<BlockId, Fall>,
    clear_fx: ClearFx,
    banner: Option<(&'static str, Instant)>,
    records: Records,
    new_record: bool,
    /// Terminal area of the last frame, for mouse hit-testing.
    area: Rect,
}

fn start_game(config: &GameConfig, games: u32) -> Result<(Box<dyn Backend>, Session)> {
    let config = GameConfig {
        seed: config.seed.wrapping_add(games),
        ..config.clone()
    };
    let backend = LocalAuthority::spawn(&config);
    let initial = backend
        .state()
        .decode(config.width, config.height)
        .context("initial state from backend")?;
    let session = Session::new(initial, &config);
    Ok((Box::new(backend), session))
}

impl App {
    pub fn new(config: GameConfig, theme: Theme, mut journal: Journal) -> Result<Self> {
        let (backend, session) = start_game(&config, 0)?;
        journal.info(format!(
            "new {}x{} game, seed {}",
            config.width, config.height, config.seed
        ));
        Ok(Self {
            cursor: (0, config.height.saturating_sub(1)),
            config,
            theme,
            journal,
            backend,
            backend_lost: false,
            session,
            screen: Screen::Playing,
            games: 0,
            grab_offset: 0,
            next_tick: None,
            busy_release: None,
            falls: HashMap::new(),
            clear_fx: ClearFx::default(),
            banner: None,
            records: highscores::load_high_scores(),
            new_record: false,
            area: Rect::default(),
        })
    }

    fn reset_game(&mut self) -> Result<()> {
        self.games = self.games.wrapping_add(1);
        let (backend, session) = start_game(&self.config, self.games)?;
        self.backend = backend;
        self.backend_lost = false;
        self.session = session;
        self.screen = Screen::Playing;
        self.cursor = (0, self.config.height.saturating_sub(1));
        self.next_tick = None;
        self.busy_release = None;
        self.falls.clear();
        self.clear_fx.reset();
        self.banner = None;
        self.new_record = false;
        self.journal.info(format!(
            "new game, seed {}",
            self.config.seed.wrapping_add(self.games)
        ));
        Ok(())
    }

    fn send(&mut self, event: Event, now: Instant) {
        self.session.transition(event);
        self.pump(now);
    }

    /// Drain and act on session effects until none are left.
    fn pump(&mut self, now: Instant) {
        loop {
            let effects = self.session.drain_effects();
            if effects.is_empty() {
                return;
            }
            for effect in effects {
                self.apply_effect(effect, now);
            }
        }
    }

    fn apply_effect(&mut self, effect: Effect, now: Instant) {
        let tick = Duration::from_millis(self.config.tick_ms);
        let transition = Duration::from_millis(self.config.transition_ms);
        match effect {
            Effect::StartTicker => self.next_tick = Some(now + tick),
            Effect::StopTicker => self.next_tick = None,
            Effect::BlocksFell(ids) => {
                if !self.config.animation {
                    return;
                }
                for id in ids {
                    let Some(block) = self.session.grid().block(id) else {
                        continue;
                    };
                    let from = self.falls.get(&id).map_or(
                        block.y.saturating_sub(1) as f32,
                        |f| f.row_at(now, transition),
                    );
                    self.falls.insert(
                        id,
                        Fall {
                            from,
                            to: block.y,
                            started: now,
                        },
                    );
                    self.session.transition(Event::AnimationStarted { block: id });
                }
            }
            Effect::RowsCleared(clearance) => {
                for b in &clearance.removed {
                    self.falls.remove(&b.id);
                }
                if self.config.animation {
                    self.clear_fx.start(&clearance.removed);
                }
                self.journal.info(format!(
                    "cleared {} row{}",
                    clearance.count(),
                    if clearance.count() == 1 { "" } else { "s" }
                ));
            }
            Effect::BonusApplied { bonus, removed } => {
                for b in &removed {
                    self.falls.remove(&b.id);
                }
                if self.config.animation {
                    self.clear_fx.start(&removed);
                }
                self.journal.info(format!(
                    "{} removed {} block{}",
                    bonus.name(),
                    removed.len(),
                    if removed.len() == 1 { "" } else { "s" }
                ));
            }
            Effect::LineInjected => self.journal.info("new line rises"),
            Effect::NextLineConsumed => {}
            Effect::GridFull => {
                self.journal.warn("grid full");
                self.banner = Some(("Grid full!", now + Duration::from_millis(BANNER_MS)));
            }
            Effect::Scored(cascade) => {
                self.journal.info(format!(
                    "+{} ({} line{})",
                    cascade.points,
                    cascade.lines,
                    if cascade.lines == 1 { "" } else { "s" }
                ));
                if let Some(msg) = combo_message(cascade.lines) {
                    self.banner = Some((msg, now + Duration::from_millis(BANNER_MS)));
                }
            }
            Effect::SubmitMove(m) => {
                self.journal.info(format!(
                    "submit move row {} {} -> {}",
                    m.row_index, m.start_index, m.final_index
                ));
                if let Err(e) = self.backend.submit_move(m) {
                    self.submission_error(&e);
                }
            }
            Effect::SubmitBonus(b) => {
                self.journal.info(format!(
                    "submit {} row {} col {}",
                    b.bonus().name(),
                    b.row_index,
                    b.block_index
                ));
                if let Err(e) = self.backend.submit_bonus(b) {
                    self.submission_error(&e);
                }
            }
            Effect::ReleaseBusyAfter(delay) => self.busy_release = Some(now + delay),
            Effect::Reconciled { replaced } => {
                if replaced {
                    self.falls.clear();
                    self.clamp_cursor();
                    self.journal.warn("board corrected by backend");
                } else {
                    self.journal.info("backend agrees");
                }
            }
            Effect::Deferred => self.journal.info("backend state held until turn ends"),
            Effect::SubmissionFailed(reason) => {
                self.journal.error(format!("submission failed: {reason}"));
            }
            Effect::Ignored(why) => self.journal.info(format!("ignored: {why}")),
        }
    }

    fn submission_error(&mut self, e: &BackendError) {
        if *e == BackendError::Disconnected {
            self.backend_lost = true;
        }
        self.session.transition(Event::SubmissionFailed {
            reason: e.to_string(),
        });
    }

    fn poll_backend(&mut self, now: Instant) {
        while !self.backend_lost {
            let Some(outcome) = self.backend.poll() else {
                break;
            };
            match outcome {
                Outcome::Confirmed(wire) => {
                    match wire.decode(self.config.width, self.config.height) {
                        Ok(state) => self.send(Event::Authoritative(Box::new(state)), now),
                        Err(e) => {
                            self.journal.error(format!("bad snapshot: {e}"));
                            self.send(
                                Event::SubmissionFailed {
                                    reason: e.to_string(),
                                },
                                now,
                            );
                        }
                    }
                }
                Outcome::Rejected { error, state } => {
                    self.submission_error(&error);
                    self.pump(now);
                    // Resync: the optimistic board kept after the failure no longer matches.
                    if let Some(wire) = state {
                        match wire.decode(self.config.width, self.config.height) {
                            Ok(state) => self.send(Event::Authoritative(Box::new(state)), now),
                            Err(e) => self.journal.error(format!("bad snapshot: {e}")),
                        }
                    }
                }
            }
        }
    }

    /// Fire due timers: gravity tick, busy release, finished drop animations.
    fn tick_timers(&mut self, now: Instant) {
        if self.next_tick.is_some_and(|t| now >= t) {
            self.next_tick = Some(now + Duration::from_millis(self.config.tick_ms));
            self.send(Event::Tick, now);
        }
        if self.busy_release.is_some_and(|t| now >= t) {
            self.busy_release = None;
            self.send(Event::BusyReleased, now);
        }
        let transition = Duration::from_millis(self.config.transition_ms);
        let finished: Vec<BlockId> = self
            .falls
            .iter()
            .filter(|(_, f)| now.saturating_duration_since(f.started) >= transition)
            .map(|(&id, _)| id)
            .collect();
        for id in finished {
            self.falls.remove(&id);
            self.send(Event::AnimationFinished { block: id }, now);
        }
        if self.banner.is_some_and(|(_, until)| now >= until) {
            self.banner = None;
        }
    }

    fn check_game_over(&mut self) {
        if self.screen != Screen::Playing
            || !self.session.is_over()
            || self.session.phase() != Phase::Waiting
            || self.session.is_awaiting_confirmation()
        {
            return;
        }
        self.screen = Screen::GameOver;
        self.next_tick = None;
        let c = self.session.counters();
        self.journal
            .warn(format!("game over: score {}, max combo {}", c.score, c.max_combo));
        self.new_record = self.records.update(c.score, c.max_combo);
        if self.new_record {
            if let Err(e) = highscores::save_high_scores(self.records) {
                self.journal.error(format!("saving records: {e}"));
            }
        }
    }

    fn clamp_cursor(&mut self) {
        let grid = self.session.grid();
        self.cursor.0 = self.cursor.0.min(grid.width.saturating_sub(1));
        self.cursor.1 = self.cursor.1.min(grid.height.saturating_sub(1));
    }

    /// Grab the block under the cursor, or fire the armed bonus at it.
    fn grab_at_cursor(&mut self, now: Instant) {
        let Some(block) = self
            .session
            .grid()
            .block_at(self.cursor.0, self.cursor.1)
            .copied()
        else {
            return;
        };
        self.grab_offset = self.cursor.0 - block.x;
        if self.session.selected_bonus().is_none() {
            self.send(Event::DragStart { block: block.id }, now);
        } else {
            self.send(Event::BonusTarget { block: block.id }, now);
        }
    }

    /// Keep the cursor on the grabbed block.
    fn follow_drag(&mut self) {
        if let Some(b) = self
            .session
            .dragging()
            .and_then(|id| self.session.grid().block(id))
        {
            self.cursor = (b.x + self.grab_offset.min(b.width - 1), b.y);
        }
    }

    fn nudge_drag(&mut self, delta: i32, now: Instant) {
        let Some(block) = self
            .session
            .dragging()
            .and_then(|id| self.session.grid().block(id))
            .copied()
        else {
            return;
        };
        let max_x = (self.session.grid().width - block.width) as i32;
        let column = (block.x as i32 + delta).clamp(0, max_x);
        self.send(Event::DragMove { column }, now);
        self.follow_drag();
    }

    fn arm_bonus(&mut self, bonus: Bonus) {
        let armed = self.session.selected_bonus();
        match self.session.select_bonus(bonus) {
            Ok(()) => match self.session.selected_bonus() {
                Bonus::None => self.journal.info(format!("{} disarmed", armed.name())),
                selected => self.journal.info(format!(
                    "{} armed: {}",
                    selected.name(),
                    selected.description()
                )),
            },
            Err(e) => self.journal.warn(e.to_string()),
        }
    }

    fn handle_playing(&mut self, action: Action, now: Instant) {
        let grid_w = self.session.grid().width;
        let grid_h = self.session.grid().height;
        let dragging = self.session.dragging().is_some();
        match action {
            Action::Left if dragging => self.nudge_drag(-1, now),
            Action::Right if dragging => self.nudge_drag(1, now),
            Action::Left => self.cursor.0 = self.cursor.0.saturating_sub(1),
            Action::Right => self.cursor.0 = (self.cursor.0 + 1).min(grid_w - 1),
            Action::Up if !dragging => self.cursor.1 = self.cursor.1.saturating_sub(1),
            Action::Down if !dragging => self.cursor.1 = (self.cursor.1 + 1).min(grid_h - 1),
            Action::Grab if dragging => self.send(Event::DragEnd, now),
            Action::Grab => self.grab_at_cursor(now),
            Action::ArmBonus(bonus) if !dragging => self.arm_bonus(bonus),
            Action::Cancel if dragging => self.send(Event::DragEnd, now),
            Action::Cancel if !self.session.selected_bonus().is_none() => {
                self.arm_bonus(Bonus::None);
            }
            Action::Cancel | Action::Quit => self.screen = Screen::QuitMenu(QuitOption::Resume),
            _ => {}
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, now: Instant) {
        if self.screen != Screen::Playing {
            return;
        }
        let grid = self.session.grid();
        let (width, height) = (grid.width as i32, grid.height as i32);
        let board = ui::board_rect(self.area, grid);
        let (cx, cy) = ui::pointer_cell(board, mouse.column, mouse.row);
        let inside = (0..width).contains(&cx) && (0..height).contains(&cy);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) if inside => {
                self.cursor = (cx as usize, cy as usize);
                if self.session.dragging().is_none() {
                    self.grab_at_cursor(now);
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let Some(block) = self
                    .session
                    .dragging()
                    .and_then(|id| self.session.grid().block(id))
                    .copied()
                else {
                    return;
                };
                let column = cx - self.grab_offset as i32;
                // Inside the grid the target clamps; outside it the raw column releases the drag.
                let column = if (0..width).contains(&cx) {
                    column.clamp(0, width - block.width as i32)
                } else {
                    column
                };
                self.send(Event::DragMove { column }, now);
                self.follow_drag();
            }
            MouseEventKind::Up(MouseButton::Left) if self.session.dragging().is_some() => {
                self.send(Event::DragEnd, now);
            }
            MouseEventKind::Moved if inside => self.cursor = (cx as usize, cy as usize),
            _ => {}
        }
    }

    /// Returns false when the app should exit.
    fn handle_action(&mut self, action: Action, now: Instant) -> Result<bool> {
        match self.screen {
            Screen::Playing if action == Action::Restart => self.reset_game()?,
            Screen::Playing => self.handle_playing(action, now),
            Screen::QuitMenu(selected) => match action {
                Action::Down | Action::Right => self.screen = Screen::QuitMenu(selected.next()),
                Action::Up | Action::Left => self.screen = Screen::QuitMenu(selected.prev()),
                Action::Grab => match selected {
                    QuitOption::Resume => self.screen = Screen::Playing,
                    QuitOption::NewGame => self.reset_game()?,
                    QuitOption::Exit => return Ok(false),
                },
                Action::Cancel | Action::Quit => self.screen = Screen::Playing,
                _ => {}
            },
            Screen::GameOver => match action {
                Action::Quit => return Ok(false),
                Action::Restart | Action::Grab => self.reset_game()?,
                _ => {}
            },
        }
        Ok(true)
    }

    pub fn run(&mut self) -> Result<()> {
        use crossterm::{
            event::{DisableMouseCapture, EnableMouseCapture},
            execute,
            terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
        };

        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let mut terminal =
            ratatui::DefaultTerminal::new(ratatui::backend::CrosstermBackend::new(stdout))?;

        let result = self.run_loop(&mut terminal);

        let _ = execute!(std::io::stdout(), DisableMouseCapture);
        execute!(std::io::stdout(), LeaveAlternateScreen)?;
        disable_raw_mode()?;

        result
    }

    fn run_loop(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        loop {
            let now = Instant::now();
            self.poll_backend(now);
            if self.screen != Screen::GameOver {
                self.tick_timers(now);
            }
            self.check_game_over();

            let rows: HashMap<BlockId, f32> = {
                let transition = Duration::from_millis(self.config.transition_ms);
                self.falls
                    .iter()
                    .map(|(&id, f)| (id, f.row_at(now, transition)))
                    .collect()
            };
            let view = View {
                session: &self.session,
                theme: &self.theme,
                journal: &self.journal,
                cursor: self.cursor,
                rows: &rows,
                banner: self.banner.map(|(text, _)| text),
                records: self.records,
                new_record: self.new_record,
                now,
            };
            let screen = self.screen;
            let animate = self.config.animation;
            let fx = &mut self.clear_fx;
            let mut area = self.area;
            terminal.draw(|f| {
                area = f.area();
                ui::draw(f, screen, &view, fx, animate);
            })?;
            self.area = area;
            self.clear_fx.finish_if_done();

            // ~60 FPS; the gravity ticker is checked every frame.
            let timeout = Duration::from_millis(16).saturating_sub(now.elapsed());
            if event::poll(timeout)? {
                while event::poll(Duration::ZERO)? {
                    let now = Instant::now();
                    match event::read()? {
                        TermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                            if !self.handle_action(key_to_action(key), now)? {
                                return Ok(());
                            }
                        }
                        TermEvent::Mouse(mouse) => self.handle_mouse(mouse, now),
                        _ => {}
                    }
                }
            }
        }
    }
}
