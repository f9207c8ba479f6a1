//! Layout and drawing: board, sidebar, game over, quit menu, clear fade.

use crate::app::{QuitOption, Screen};
use crate::bonus::Bonus;
use crate::grid::{Block as GridBlock, BlockId, DANGER_ROWS, GridSnapshot};
use crate::highscores::Records;
use crate::journal::{Journal, Level};
use crate::session::Session;
use crate::theme::Theme;
use ratatui::Frame;
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Widget};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tachyonfx::{
    CellFilter, Duration as TfxDuration, Effect, EffectRenderer, Interpolation, fx, ref_count,
};

/// Terminal columns per grid column.
pub const CELL_W: u16 = 4;
/// Terminal rows per grid row.
pub const CELL_H: u16 = 2;
const SIDEBAR_WIDTH: u16 = 30;
/// Sidebar sections need this many rows even when the board is shorter.
const MIN_HEIGHT: u16 = 24;
/// Duration of the fade over cleared blocks, in ms.
const CLEAR_FADE_MS: u32 = 350;

/// Everything the renderer reads. Built by the app once per frame.
pub struct View<'a> {
    pub session: &'a Session,
    pub theme: &'a Theme,
    pub journal: &'a Journal,
    pub cursor: (usize, usize),
    /// Display row of blocks that are mid-drop.
    pub rows: &'a HashMap<BlockId, f32>,
    pub banner: Option<&'a str>,
    pub records: Records,
    pub new_record: bool,
    pub now: Instant,
}

/// Fade-out of cleared or bonus-removed blocks.
#[derive(Default)]
pub struct ClearFx {
    cells: Vec<GridBlock>,
    effect: Option<Effect>,
    last: Option<Instant>,
}

impl ClearFx {
    /// Add blocks to fade; restarts the effect so the new cells are covered.
    pub fn start(&mut self, removed: &[GridBlock]) {
        self.cells.extend_from_slice(removed);
        self.effect = None;
        self.last = None;
    }

    pub fn finish_if_done(&mut self) {
        if self.effect.as_ref().is_some_and(|e| e.done()) {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.cells.clear();
        self.effect = None;
        self.last = None;
    }
}

fn board_size(grid: &GridSnapshot) -> (u16, u16) {
    (
        grid.width as u16 * CELL_W + 2,
        grid.height as u16 * CELL_H + 2,
    )
}

/// Board (with border) and sidebar rects, centred in `area`.
fn game_layout(area: Rect, grid: &GridSnapshot) -> (Rect, Rect) {
    let (bw, bh) = board_size(grid);
    let total_w = bw + SIDEBAR_WIDTH;
    let total_h = bh.max(MIN_HEIGHT);

    let horiz = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(total_w),
            Constraint::Fill(1),
        ])
        .split(area);
    let vert = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(total_h),
            Constraint::Fill(1),
        ])
        .split(horiz[1]);
    let inner = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(bw), Constraint::Length(SIDEBAR_WIDTH)])
        .split(vert[1]);
    let board = Rect {
        height: bh.min(inner[0].height),
        ..inner[0]
    };
    (board, inner[1])
}

/// Grid area inside the board border.
pub fn board_rect(area: Rect, grid: &GridSnapshot) -> Rect {
    let (outer, _) = game_layout(area, grid);
    Rect {
        x: outer.x + 1,
        y: outer.y + 1,
        width: outer.width.saturating_sub(2),
        height: outer.height.saturating_sub(2),
    }
}

/// Grid cell under a terminal position. May lie outside the grid.
pub fn pointer_cell(board: Rect, column: u16, row: u16) -> (i32, i32) {
    (
        (column as i32 - board.x as i32).div_euclid(CELL_W as i32),
        (row as i32 - board.y as i32).div_euclid(CELL_H as i32),
    )
}

/// Set one cell, ignoring positions outside `clip`.
fn put(buf: &mut Buffer, clip: Rect, x: i32, y: i32, symbol: &str, style: Style) {
    let (Ok(x), Ok(y)) = (u16::try_from(x), u16::try_from(y)) else {
        return;
    };
    if clip.contains(Position { x, y }) {
        buf[(x, y)].set_symbol(symbol).set_style(style);
    }
}

/// Terminal cells covered by a block whose top grid row is `row`.
fn block_cells(board: Rect, x: usize, row: f32, width: usize) -> impl Iterator<Item = (i32, i32, bool)> {
    let top = board.y as i32 + (row * CELL_H as f32).round() as i32;
    let left = board.x as i32 + x as i32 * CELL_W as i32;
    let cols = width as i32 * CELL_W as i32 - 1;
    (0..cols).flat_map(move |dx| [(left + dx, top, true), (left + dx, top + 1, false)])
}

pub fn draw(frame: &mut Frame, screen: Screen, view: &View<'_>, fx: &mut ClearFx, animate: bool) {
    let area = frame.area();
    draw_game(frame, view, area);
    if animate && !fx.cells.is_empty() {
        apply_clear_effect(frame, view, area, fx);
    }
    match screen {
        Screen::Playing => {}
        Screen::GameOver => draw_game_over(frame, view, area),
        Screen::QuitMenu(selected) => draw_quit_menu(frame, view.theme, selected),
    }
}

/// Draw cleared blocks white, then let TachyonFX fade them to the board background.
fn apply_clear_effect(frame: &mut Frame, view: &View<'_>, area: Rect, fx: &mut ClearFx) {
    let grid = view.session.grid();
    let board = board_rect(area, grid);
    let delta = fx
        .last
        .map(|t| view.now.saturating_duration_since(t))
        .unwrap_or(std::time::Duration::ZERO);
    let tfx_delta = TfxDuration::from_millis(delta.as_millis().min(u32::MAX as u128) as u32);
    fx.last = Some(view.now);

    let white = Style::default().bg(Color::White);
    let mut positions = HashSet::new();
    for b in &fx.cells {
        for (x, y, _) in block_cells(board, b.x, b.y as f32, b.width) {
            put(frame.buffer_mut(), board, x, y, " ", white);
            if let (Ok(x), Ok(y)) = (u16::try_from(x), u16::try_from(y)) {
                positions.insert((x, y));
            }
        }
    }

    if fx.effect.is_none() {
        let filter = CellFilter::PositionFn(ref_count(move |pos: Position| {
            positions.contains(&(pos.x, pos.y))
        }));
        let bg = view.theme.bg;
        let effect = fx::fade_to(bg, bg, (CLEAR_FADE_MS, Interpolation::Linear))
            .with_filter(filter)
            .with_area(board);
        fx.effect = Some(effect);
    }
    if let Some(effect) = fx.effect.as_mut() {
        frame.render_effect(effect, board, tfx_delta);
    }
}

fn draw_game(frame: &mut Frame, view: &View<'_>, area: Rect) {
    let (board_area, sidebar_area) = game_layout(area, view.session.grid());
    draw_board(frame, view, board_area);
    draw_sidebar(frame, view, sidebar_area);
}

fn draw_board(frame: &mut Frame, view: &View<'_>, area: Rect) {
    let theme = view.theme;
    let session = view.session;
    let grid = session.grid();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.div_line).bg(theme.bg))
        .title(Span::styled(" Kubetui ", theme.title))
        .title_bottom(Span::styled(
            format!(" {} ", session.phase().label()),
            Style::default().fg(theme.inactive_fg),
        ));
    let board = block.inner(area);
    block.render(area, frame.buffer_mut());

    let buf = frame.buffer_mut();
    let bg = Style::default().bg(theme.bg);
    for y in board.top()..board.bottom() {
        let danger = session.in_danger() && ((y - board.y) / CELL_H) < DANGER_ROWS as u16;
        let style = if danger { Style::default().bg(theme.danger) } else { bg };
        for x in board.left()..board.right() {
            buf[(x, y)].set_symbol(" ").set_style(style);
        }
    }

    let hovered = grid.block_at(view.cursor.0, view.cursor.1).map(|b| b.id);
    let dragging = session.dragging();
    for b in grid.blocks() {
        let row = view
            .rows
            .get(&b.id)
            .filter(|_| session.is_animating(b.id))
            .copied()
            .unwrap_or(b.y as f32);
        let mut color = theme.block_color(b.width);
        if Some(b.id) == dragging {
            color = theme.title;
        }
        let mut top_left = None;
        for (x, y, upper) in block_cells(board, b.x, row, b.width) {
            if upper {
                top_left.get_or_insert((x, y));
                put(buf, board, x, y, " ", Style::default().bg(color));
            } else {
                put(buf, board, x, y, "▀", Style::default().fg(color).bg(theme.bg));
            }
        }
        if Some(b.id) == hovered {
            if let Some((x, y)) = top_left {
                let glyph = cursor_glyph(session.selected_bonus(), dragging.is_some());
                let mid = (x + (b.width as i32 * CELL_W as i32 - 1) / 2 - 1).max(x);
                let style = Style::default()
                    .fg(theme.bg)
                    .bg(color)
                    .add_modifier(Modifier::BOLD);
                for (i, ch) in glyph.chars().enumerate() {
                    put(buf, board, mid + i as i32, y, &ch.to_string(), style);
                }
            }
        }
    }

    if hovered.is_none() {
        let x = board.x as i32 + view.cursor.0 as i32 * CELL_W as i32;
        let y = board.y as i32 + view.cursor.1 as i32 * CELL_H as i32;
        let style = Style::default().fg(theme.title).bg(theme.bg);
        put(buf, board, x, y, "[", style);
        put(buf, board, x + CELL_W as i32 - 2, y, "]", style);
    }

    if let Some(text) = view.banner {
        let label = format!(" {text} ");
        let w = label.chars().count() as u16;
        if w <= board.width && board.height > 0 {
            let x = board.x + (board.width - w) / 2;
            let style = Style::default()
                .fg(theme.bg)
                .bg(theme.title)
                .add_modifier(Modifier::BOLD);
            buf.set_string(x, board.y + board.height / 3, label, style);
        }
    }
}

fn cursor_glyph(bonus: Bonus, dragging: bool) -> &'static str {
    if dragging {
        return "◀▶";
    }
    match bonus {
        Bonus::None => "<>",
        Bonus::Hammer => "H!",
        Bonus::Wave => "W!",
        Bonus::Totem => "T!",
    }
}

fn section(frame: &mut Frame, theme: &Theme, area: Rect, title: &str) -> Rect {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.div_line).bg(theme.bg))
        .title(Span::styled(format!(" {title} "), theme.title));
    let inner = block.inner(area);
    block.render(area, frame.buffer_mut());
    inner
}

fn draw_sidebar(frame: &mut Frame, view: &View<'_>, area: Rect) {
    let theme = view.theme;
    let session = view.session;
    let title_style = Style::default().fg(theme.title);
    let fg_style = Style::default().fg(theme.main_fg);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // Stats
            Constraint::Length(4), // Turn
            Constraint::Length(5), // Bonuses
            Constraint::Length(3), // Next line
            Constraint::Min(3),    // Journal
        ])
        .split(area);

    let counters = session.counters();
    let stat = |label: &'static str, value: u32| {
        Line::from(vec![
            Span::styled(label, title_style),
            Span::styled(value.to_string(), fg_style),
        ])
    };
    let inner = section(frame, theme, chunks[0], "Stats");
    Paragraph::new(vec![
        stat("Score: ", counters.score),
        stat("Combo: ", counters.combo),
        stat("Max combo: ", counters.max_combo),
        Line::from(vec![
            Span::styled("Best: ", title_style),
            Span::styled(
                format!("{} / x{}", view.records.score, view.records.combo),
                fg_style,
            ),
        ]),
    ])
    .render(inner, frame.buffer_mut());

    let inner = section(frame, theme, chunks[1], "Turn");
    let status = if session.is_awaiting_confirmation() {
        Span::styled("Waiting for backend", Style::default().fg(Color::Yellow))
    } else if session.is_tx_processing() {
        Span::styled("Busy", Style::default().fg(Color::Yellow))
    } else {
        Span::styled("Your move", Style::default().fg(Color::Green))
    };
    let danger = if session.in_danger() {
        Span::styled("  Danger!", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    } else {
        Span::raw("")
    };
    Paragraph::new(vec![
        Line::from(vec![status, danger]),
        Line::from(Span::styled(session.phase().label(), fg_style)),
    ])
    .render(inner, frame.buffer_mut());

    let inner = section(frame, theme, chunks[2], "Bonuses");
    let lines: Vec<Line> = Bonus::ALL
        .iter()
        .enumerate()
        .map(|(i, &bonus)| {
            let left = session.remaining(bonus);
            let style = if session.selected_bonus() == bonus {
                Style::default().fg(theme.bg).bg(theme.title)
            } else if left == 0 {
                Style::default().fg(theme.inactive_fg)
            } else {
                fg_style
            };
            Line::from(Span::styled(
                format!("{} {:<7} x{}", i + 1, bonus.name(), left),
                style,
            ))
        })
        .collect();
    Paragraph::new(lines).render(inner, frame.buffer_mut());

    let inner = section(frame, theme, chunks[3], "Next line");
    draw_next_line(frame, view, inner);

    let inner = section(frame, theme, chunks[4], "Journal");
    let lines: Vec<Line> = view
        .journal
        .recent(inner.height as usize)
        .map(|e| {
            let color = match e.level {
                Level::Info => theme.main_fg,
                Level::Warn => Color::Yellow,
                Level::Error => Color::Red,
            };
            Line::from(Span::styled(e.message.clone(), Style::default().fg(color)))
        })
        .collect();
    Paragraph::new(lines).render(inner, frame.buffer_mut());
}

/// Next line as a strip of two-column cells.
fn draw_next_line(frame: &mut Frame, view: &View<'_>, area: Rect) {
    let line = view.session.next_line();
    if line.consumed {
        Paragraph::new(Span::styled("(revealing...)", Style::default().fg(view.theme.inactive_fg)))
            .render(area, frame.buffer_mut());
        return;
    }
    let buf = frame.buffer_mut();
    for seg in &line.segments {
        let color = view.theme.block_color(seg.width);
        let left = area.x as i32 + seg.x as i32 * 2;
        for dx in 0..(seg.width as i32 * 2 - 1) {
            put(buf, area, left + dx, area.y as i32, "█", Style::default().fg(color));
        }
    }
}

fn draw_game_over(frame: &mut Frame, view: &View<'_>, area: Rect) {
    let theme = view.theme;
    let counters = view.session.counters();
    let popup_w = 30u16;
    let popup_h = 10u16;
    let popup = Rect {
        x: area.x + area.width.saturating_sub(popup_w) / 2,
        y: area.y + area.height.saturating_sub(popup_h) / 2,
        width: popup_w.min(area.width),
        height: popup_h.min(area.height),
    };
    let fg = Style::default().fg(theme.main_fg);
    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            " Game Over ",
            Style::default().fg(Color::White).bg(Color::Red),
        )),
        Line::from(""),
        Line::from(Span::styled(format!(" Score: {} ", counters.score), fg)),
        Line::from(Span::styled(format!(" Max combo: {} ", counters.max_combo), fg)),
        Line::from(Span::styled(
            format!(" Best: {} / x{} ", view.records.score, view.records.combo),
            fg,
        )),
    ];
    if view.new_record {
        lines.push(Line::from(Span::styled(
            " New record! ",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
    }
    lines.push(Line::from(Span::styled(" R: Restart    Q: Quit ", fg)));
    Widget::render(ratatui::widgets::Clear, popup, frame.buffer_mut());
    let p = Paragraph::new(lines).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.div_line).bg(theme.bg))
            .title(Span::styled(" Kubetui ", theme.title)),
    );
    p.render(popup, frame.buffer_mut());
}

fn draw_quit_menu(frame: &mut Frame, theme: &Theme, selected: QuitOption) {
    let area = frame.area();
    let qw = 24;
    let qh = 8;
    let quit_rect = Rect {
        x: area.x + area.width.saturating_sub(qw) / 2,
        y: area.y + area.height.saturating_sub(qh) / 2,
        width: qw.min(area.width),
        height: qh.min(area.height),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.title))
        .title(" Quit? ");

    for y in quit_rect.top()..quit_rect.bottom() {
        for x in quit_rect.left()..quit_rect.right() {
            frame.buffer_mut()[(x, y)]
                .set_symbol(" ")
                .set_style(Style::default().bg(theme.bg));
        }
    }

    let inner = block.inner(quit_rect);
    block.render(quit_rect, frame.buffer_mut());

    let options = [
        (QuitOption::Resume, " Resume "),
        (QuitOption::NewGame, " New Game "),
        (QuitOption::Exit, " Exit "),
    ];

    for (i, (opt, label)) in options.iter().enumerate() {
        let style = if *opt == selected {
            Style::default()
                .fg(theme.bg)
                .bg(theme.title)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.title)
        };
        let rx = inner.x + (inner.width.saturating_sub(label.len() as u16)) / 2;
        let ry = inner.y + 1 + i as u16 * 2;
        if ry < inner.bottom() {
            frame.buffer_mut().set_string(rx, ry, label, style);
        }
    }
}
