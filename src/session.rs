//! Turn state machine: drag, gravity, line clear, next line, submit, reconcile.
//!
//! Every input (pointer, ticker, network) is an [`Event`] fed to [`Session::transition`].
//! Side effects the session cannot perform itself (timers, submissions, animation) are
//! queued as [`Effect`]s and drained by the caller.

use crate::bonus::{Bonus, BonusError};
use crate::counters::{Cascade, Counters};
use crate::grid::{Block, BlockId, Clearance, GridSnapshot, NextLine};
use crate::phase::Phase;
use crate::reconcile::{Reconciliation, Snapshot, reconcile};
use std::collections::BTreeSet;
use std::time::Duration;

/// Input to the machine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Pointer pressed on a block with no bonus armed.
    DragStart { block: BlockId },
    /// Pointer moved; `column` is where the dragged block's left edge wants to be.
    DragMove { column: i32 },
    DragEnd,
    /// Pointer pressed on a block while a bonus is armed.
    BonusTarget { block: BlockId },
    /// Gravity ticker fired.
    Tick,
    AnimationStarted { block: BlockId },
    AnimationFinished { block: BlockId },
    /// Decoded authoritative state from the backend.
    Authoritative(Box<Snapshot>),
    SubmissionFailed { reason: String },
    /// Settle delay after a confirmation elapsed.
    BusyReleased,
}

/// `submitMove(row_index, start_index, final_index)`; `row_index` counts from the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveSubmission {
    pub row_index: usize,
    pub start_index: usize,
    pub final_index: usize,
}

/// `submitBonus(kind, row_index, block_index)`; `kind` is the wire index of the bonus and
/// `block_index` is the target's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonusSubmission {
    pub kind: u8,
    pub row_index: usize,
    pub block_index: usize,
}

impl BonusSubmission {
    pub fn bonus(&self) -> Bonus {
        Bonus::from_index(self.kind)
    }
}

/// Work requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartTicker,
    StopTicker,
    BlocksFell(Vec<BlockId>),
    RowsCleared(Clearance),
    BonusApplied { bonus: Bonus, removed: Vec<Block> },
    LineInjected,
    /// The next line was used up; the backend will provide another.
    NextLineConsumed,
    GridFull,
    Scored(Cascade),
    SubmitMove(MoveSubmission),
    SubmitBonus(BonusSubmission),
    /// Clear the busy flag after this delay by sending [`Event::BusyReleased`].
    ReleaseBusyAfter(Duration),
    Reconciled { replaced: bool },
    /// Authoritative state arrived mid-turn and is held until the phase returns to waiting.
    Deferred,
    SubmissionFailed(String),
    /// Invalid interaction; no state changed.
    Ignored(&'static str),
}

/// Move created when a drag ends on a different column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMove {
    pub block: BlockId,
    pub row: usize,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    block: BlockId,
    start_x: usize,
}

/// One game session: the optimistic snapshot plus turn bookkeeping.
#[derive(Debug)]
pub struct Session {
    snapshot: Snapshot,
    phase: Phase,
    drag: Option<Drag>,
    pending: Option<PendingMove>,
    bonus_target: Option<Block>,
    selected_bonus: Bonus,
    /// Blocks whose drop animation has not finished.
    animating: BTreeSet<BlockId>,
    /// Rows cleared since the current cascade began.
    cascade_lines: u32,
    tx_processing: bool,
    awaiting_confirmation: bool,
    danger: bool,
    deferred: Option<Box<Snapshot>>,
    settle_delay: Duration,
    effects: Vec<Effect>,
}

impl Session {
    pub fn new(initial: Snapshot, config: &crate::GameConfig) -> Self {
        let danger = initial.grid.in_danger();
        Self {
            snapshot: initial,
            phase: Phase::Waiting,
            drag: None,
            pending: None,
            bonus_target: None,
            selected_bonus: Bonus::None,
            animating: BTreeSet::new(),
            cascade_lines: 0,
            tx_processing: false,
            awaiting_confirmation: false,
            danger,
            deferred: None,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            effects: Vec::new(),
        }
    }

    #[inline]
    pub fn grid(&self) -> &GridSnapshot {
        &self.snapshot.grid
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn counters(&self) -> Counters {
        self.snapshot.counters
    }

    #[inline]
    pub fn next_line(&self) -> &NextLine {
        &self.snapshot.next_line
    }

    /// Any block within the top rows, as of the last authoritative load.
    #[inline]
    pub fn in_danger(&self) -> bool {
        self.danger
    }

    #[inline]
    pub fn is_over(&self) -> bool {
        self.snapshot.over
    }

    #[inline]
    pub fn is_tx_processing(&self) -> bool {
        self.tx_processing
    }

    #[inline]
    pub fn is_awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    #[inline]
    pub fn pending_move(&self) -> Option<PendingMove> {
        self.pending
    }

    #[inline]
    pub fn selected_bonus(&self) -> Bonus {
        self.selected_bonus
    }

    pub fn dragging(&self) -> Option<BlockId> {
        self.drag.map(|d| d.block)
    }

    pub fn is_animating(&self, id: BlockId) -> bool {
        self.animating.contains(&id)
    }

    /// Uses left for `bonus`, from the optimistic counters.
    pub fn remaining(&self, bonus: Bonus) -> u32 {
        let c = self.snapshot.counters;
        bonus.remaining(c.score, c.combo, self.snapshot.bonuses_used.get(bonus))
    }

    /// Arm or disarm a bonus. Selecting the armed bonus (or `None`) disarms it.
    /// An exhausted bonus is refused here so it never reaches the grid.
    pub fn select_bonus(&mut self, bonus: Bonus) -> Result<(), BonusError> {
        if bonus.is_none() || bonus == self.selected_bonus {
            self.selected_bonus = Bonus::None;
            return Ok(());
        }
        if self.remaining(bonus) == 0 {
            return Err(BonusError::Exhausted(bonus));
        }
        self.selected_bonus = bonus;
        Ok(())
    }

    /// Take queued effects, oldest first.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Feed one event; returns the phase after it.
    pub fn transition(&mut self, event: Event) -> Phase {
        match event {
            Event::DragStart { block } => self.on_drag_start(block),
            Event::DragMove { column } => self.on_drag_move(column),
            Event::DragEnd => {
                if self.phase != Phase::Dragging {
                    return self.ignore("drag end without drag");
                }
                self.end_drag()
            }
            Event::BonusTarget { block } => self.on_bonus_target(block),
            Event::Tick => self.on_tick(),
            Event::AnimationStarted { block } => {
                if self.snapshot.grid.block(block).is_some() {
                    self.animating.insert(block);
                }
                self.phase
            }
            Event::AnimationFinished { block } => {
                self.animating.remove(&block);
                self.phase
            }
            Event::Authoritative(state) => {
                if self.phase == Phase::Waiting {
                    self.apply_authoritative(*state);
                } else {
                    self.deferred = Some(state);
                    self.effects.push(Effect::Deferred);
                }
                self.phase
            }
            Event::SubmissionFailed { reason } => {
                self.awaiting_confirmation = false;
                self.tx_processing = false;
                self.pending = None;
                self.effects.push(Effect::SubmissionFailed(reason));
                self.phase
            }
            Event::BusyReleased => {
                if !self.awaiting_confirmation {
                    self.tx_processing = false;
                }
                self.phase
            }
        }
    }

    fn ignore(&mut self, why: &'static str) -> Phase {
        self.effects.push(Effect::Ignored(why));
        self.phase
    }

    /// Input is accepted only in `Waiting`, with nothing in flight and the game still running.
    fn input_locked(&self) -> Option<&'static str> {
        if self.phase != Phase::Waiting {
            Some("turn in progress")
        } else if self.tx_processing || self.awaiting_confirmation {
            Some("transaction in flight")
        } else if self.snapshot.over {
            Some("game over")
        } else {
            None
        }
    }

    fn on_drag_start(&mut self, block: BlockId) -> Phase {
        if let Some(why) = self.input_locked() {
            return self.ignore(why);
        }
        let Some(b) = self.snapshot.grid.block(block) else {
            return self.ignore("no such block");
        };
        self.drag = Some(Drag {
            block,
            start_x: b.x,
        });
        self.phase = Phase::Dragging;
        self.phase
    }

    fn on_drag_move(&mut self, column: i32) -> Phase {
        let Some(drag) = self.drag.filter(|_| self.phase == Phase::Dragging) else {
            return self.ignore("move without drag");
        };
        let Some(block) = self.snapshot.grid.block(drag.block).copied() else {
            self.drag = None;
            self.phase = Phase::Waiting;
            return self.phase;
        };
        let max_x = (self.snapshot.grid.width - block.width) as i32;
        let left_grid = column < 0 || column > max_x;
        let target = column.clamp(0, max_x) as usize;
        match self.snapshot.grid.slide_limit(block.id, target) {
            Some(x) if x != block.x => {
                self.snapshot.grid.move_block(block.id, x);
            }
            _ => {}
        }
        if left_grid {
            return self.end_drag();
        }
        self.phase
    }

    fn end_drag(&mut self) -> Phase {
        let Some(drag) = self.drag.take() else {
            self.phase = Phase::Waiting;
            return self.phase;
        };
        let block = self.snapshot.grid.block(drag.block).copied();
        match block {
            Some(b) if b.x != drag.start_x => {
                self.pending = Some(PendingMove {
                    block: b.id,
                    row: b.y,
                    from: drag.start_x,
                    to: b.x,
                });
                self.tx_processing = true;
                self.cascade_lines = 0;
                self.phase = Phase::Gravity;
                self.effects.push(Effect::StartTicker);
            }
            _ => self.return_to_waiting(),
        }
        self.phase
    }

    fn on_bonus_target(&mut self, block: BlockId) -> Phase {
        if let Some(why) = self.input_locked() {
            return self.ignore(why);
        }
        let Some(target) = self.snapshot.grid.block(block).copied() else {
            return self.ignore("no such block");
        };
        let bonus = self.selected_bonus;
        if !bonus.is_none() && self.remaining(bonus) == 0 {
            self.selected_bonus = Bonus::None;
            return self.ignore("bonus exhausted");
        }
        let removed = match bonus.apply(&target, &mut self.snapshot.grid) {
            Ok(removed) => removed,
            Err(_) => return self.ignore("no bonus selected"),
        };
        for b in &removed {
            self.animating.remove(&b.id);
        }
        self.effects.push(Effect::BonusApplied { bonus, removed });
        self.bonus_target = Some(target);
        self.tx_processing = true;
        self.cascade_lines = 0;
        self.phase = Phase::GravityBonus;
        self.effects.push(Effect::StartTicker);
        self.phase
    }

    fn on_tick(&mut self) -> Phase {
        match self.phase {
            p if p.is_gravity() => self.gravity_step(),
            p if p.is_line_clear() => self.line_clear_step(),
            Phase::AddLine => self.add_line_step(),
            Phase::MoveTx => self.move_tx_step(),
            Phase::BonusTx => self.bonus_tx_step(),
            _ => {}
        }
        self.phase
    }

    fn gravity_step(&mut self) {
        let moved = self.snapshot.grid.apply_gravity();
        if !moved.is_empty() {
            self.effects.push(Effect::BlocksFell(moved));
            return;
        }
        if !self.animating.is_empty() {
            return;
        }
        self.phase = match self.phase {
            Phase::Gravity => Phase::LineClear,
            Phase::Gravity2 => Phase::LineClear2,
            _ => Phase::LineClearBonus,
        };
    }

    fn line_clear_step(&mut self) {
        let clearance = self.snapshot.grid.clear_complete_rows();
        if clearance.count() > 0 {
            self.cascade_lines += clearance.count() as u32;
            for b in &clearance.removed {
                self.animating.remove(&b.id);
            }
            self.effects.push(Effect::RowsCleared(clearance));
            self.phase = self.phase.gravity_of();
            return;
        }
        self.phase = match self.phase {
            Phase::LineClear => Phase::AddLine,
            Phase::LineClear2 => Phase::MoveTx,
            _ => Phase::BonusTx,
        };
    }

    fn add_line_step(&mut self) {
        let moved = self.pending.is_some_and(|p| p.from != p.to);
        let line = &self.snapshot.next_line;
        if moved && !line.consumed && !line.segments.is_empty() {
            match self.snapshot.grid.inject(&mut self.snapshot.next_line) {
                Ok(()) => self.effects.push(Effect::LineInjected),
                Err(_) => {
                    self.snapshot.over = true;
                    self.effects.push(Effect::GridFull);
                }
            }
            self.effects.push(Effect::NextLineConsumed);
        }
        self.phase = Phase::Gravity2;
    }

    fn move_tx_step(&mut self) {
        self.finish_cascade();
        if let Some(p) = self.pending {
            let height = self.snapshot.grid.height;
            self.effects.push(Effect::SubmitMove(MoveSubmission {
                row_index: height - 1 - p.row,
                start_index: p.from,
                final_index: p.to,
            }));
            self.awaiting_confirmation = true;
        }
        self.return_to_waiting();
    }

    fn bonus_tx_step(&mut self) {
        self.finish_cascade();
        let bonus = self.selected_bonus;
        if let Some(target) = self.bonus_target.take() {
            let height = self.snapshot.grid.height;
            self.effects.push(Effect::SubmitBonus(BonusSubmission {
                kind: bonus.index(),
                row_index: target.row_from_bottom(height),
                block_index: target.x,
            }));
            self.snapshot.bonuses_used.spend(bonus);
            self.awaiting_confirmation = true;
        }
        self.selected_bonus = Bonus::None;
        self.return_to_waiting();
    }

    /// Score the cascade that just ended. A presentation estimate; reconciliation overrides it.
    fn finish_cascade(&mut self) {
        let cascade = Cascade::from_lines(self.cascade_lines);
        self.cascade_lines = 0;
        self.snapshot.counters.apply(cascade);
        if cascade.lines > 0 {
            self.effects.push(Effect::Scored(cascade));
        }
    }

    fn return_to_waiting(&mut self) {
        let was_busy = self.phase.is_busy();
        self.phase = Phase::Waiting;
        if was_busy {
            self.effects.push(Effect::StopTicker);
        }
        if let Some(state) = self.deferred.take() {
            self.apply_authoritative(*state);
        }
    }

    fn apply_authoritative(&mut self, state: Snapshot) {
        let confirming = self.awaiting_confirmation;
        self.awaiting_confirmation = false;
        if confirming {
            self.pending = None;
        }
        let replaced = reconcile(&mut self.snapshot, state) == Reconciliation::Replaced;
        if replaced {
            self.pending = None;
            self.drag = None;
            self.bonus_target = None;
            self.animating.clear();
            self.cascade_lines = 0;
            self.danger = self.snapshot.grid.in_danger();
            self.phase = Phase::Waiting;
        }
        self.effects.push(Effect::Reconciled { replaced });
        if confirming || self.tx_processing {
            self.effects.push(Effect::ReleaseBusyAfter(self.settle_delay));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Segment;

    fn config() -> crate::GameConfig {
        crate::GameConfig::default()
    }

    fn snapshot(w: usize, h: usize, cells: &[(usize, usize, usize)]) -> Snapshot {
        let mut s = Snapshot::empty(w, h);
        s.grid = GridSnapshot::from_blocks(w, h, cells.iter().copied()).unwrap();
        s
    }

    fn session(w: usize, h: usize, cells: &[(usize, usize, usize)]) -> Session {
        Session::new(snapshot(w, h, cells), &config())
    }

    /// Tick until the phase is `Waiting` again; returns every effect seen.
    fn run_turn(s: &mut Session) -> Vec<Effect> {
        let mut all = s.drain_effects();
        for _ in 0..200 {
            if s.transition(Event::Tick) == Phase::Waiting {
                all.extend(s.drain_effects());
                return all;
            }
            all.extend(s.drain_effects());
        }
        panic!("turn never finished, stuck in {:?}", s.phase());
    }

    fn submitted_moves(effects: &[Effect]) -> Vec<MoveSubmission> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::SubmitMove(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_drag_to_empty_column_submits_once() {
        let mut s = session(8, 10, &[(2, 5, 2), (0, 9, 1)]);
        assert_eq!(s.transition(Event::DragStart { block: 1 }), Phase::Dragging);
        s.transition(Event::DragMove { column: 3 });
        s.transition(Event::DragMove { column: 4 });
        assert_eq!(s.grid().block(1).unwrap().x, 4);
        assert_eq!(s.transition(Event::DragEnd), Phase::Gravity);
        assert!(s.is_tx_processing());
        assert_eq!(
            s.pending_move(),
            Some(PendingMove { block: 1, row: 5, from: 2, to: 4 })
        );

        let effects = run_turn(&mut s);
        assert_eq!(
            submitted_moves(&effects),
            vec![MoveSubmission { row_index: 10 - 1 - 5, start_index: 2, final_index: 4 }]
        );
        assert!(effects.contains(&Effect::StopTicker));
        assert!(s.is_awaiting_confirmation());
        s.grid().validate().unwrap();
    }

    #[test]
    fn test_zero_delta_drag_returns_to_waiting() {
        let mut s = session(8, 10, &[(2, 9, 2)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 3 });
        s.transition(Event::DragMove { column: 2 });
        assert_eq!(s.transition(Event::DragEnd), Phase::Waiting);
        assert!(!s.is_tx_processing());
        assert!(s.pending_move().is_none());
        assert!(!s.drain_effects().contains(&Effect::StartTicker));
    }

    #[test]
    fn test_drag_blocked_by_neighbour() {
        let mut s = session(8, 10, &[(0, 9, 2), (3, 9, 2)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 1 });
        s.transition(Event::DragMove { column: 4 });
        assert_eq!(s.grid().block(1).unwrap().x, 1);
    }

    #[test]
    fn test_drag_leaving_grid_auto_releases() {
        let mut s = session(8, 10, &[(2, 9, 2)]);
        s.transition(Event::DragStart { block: 1 });
        assert_eq!(s.transition(Event::DragMove { column: 9 }), Phase::Gravity);
        assert_eq!(s.grid().block(1).unwrap().x, 6);
        assert_eq!(s.pending_move().map(|p| p.to), Some(6));
    }

    #[test]
    fn test_drag_rejected_while_busy() {
        let mut s = session(8, 10, &[(0, 9, 1), (4, 9, 1)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 2 });
        s.transition(Event::DragEnd);
        s.drain_effects();
        assert_eq!(s.transition(Event::DragStart { block: 2 }), Phase::Gravity);
        assert_eq!(s.drain_effects(), vec![Effect::Ignored("turn in progress")]);

        run_turn(&mut s);
        assert_eq!(s.transition(Event::DragStart { block: 2 }), Phase::Waiting);
        assert_eq!(s.drain_effects(), vec![Effect::Ignored("transaction in flight")]);
    }

    #[test]
    fn test_drag_stops_short_of_neighbour() {
        let mut s = session(8, 10, &[(0, 9, 2), (6, 9, 1)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 6 });
        assert_eq!(s.grid().block(1).unwrap().x, 4);
    }

    #[test]
    fn test_single_line_clear_scores_one() {
        // Row 9 has a gap at column 7; block 3 slides over it and drops in.
        let mut s = session(8, 10, &[(0, 9, 4), (4, 9, 3), (5, 8, 1)]);
        s.transition(Event::DragStart { block: 3 });
        s.transition(Event::DragMove { column: 7 });
        assert_eq!(s.transition(Event::DragEnd), Phase::Gravity);
        let effects = run_turn(&mut s);
        assert!(effects.iter().any(|e| matches!(e, Effect::RowsCleared(c) if c.rows == vec![9])));
        assert!(effects.contains(&Effect::Scored(Cascade { lines: 1, points: 1, combo: 0 })));
        assert_eq!(s.counters(), Counters { score: 1, combo: 0, max_combo: 0 });
        assert!(s.grid().is_empty());
    }

    #[test]
    fn test_two_row_cascade_counts_combo() {
        let mut s = session(4, 6, &[(0, 5, 3), (0, 4, 3), (3, 3, 1), (1, 2, 1)]);
        // Block 3 drops first; block 4 then lands on it, completing both rows at once.
        s.transition(Event::DragStart { block: 4 });
        s.transition(Event::DragMove { column: 3 });
        assert_eq!(s.transition(Event::DragEnd), Phase::Gravity);
        let effects = run_turn(&mut s);
        let cleared: usize = effects
            .iter()
            .filter_map(|e| match e {
                Effect::RowsCleared(c) => Some(c.count()),
                _ => None,
            })
            .sum();
        assert_eq!(cleared, 2);
        assert!(effects.contains(&Effect::Scored(Cascade { lines: 2, points: 3, combo: 2 })));
        assert_eq!(s.counters(), Counters { score: 3, combo: 2, max_combo: 2 });
        assert!(s.grid().is_empty());
    }

    #[test]
    fn test_next_line_injected_after_move() {
        let mut initial = snapshot(8, 10, &[(0, 9, 2)]);
        initial.next_line = NextLine::new(vec![Segment { x: 0, width: 3 }, Segment { x: 5, width: 1 }]);
        let mut s = Session::new(initial, &config());
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 4 });
        s.transition(Event::DragEnd);
        let effects = run_turn(&mut s);
        assert!(effects.contains(&Effect::LineInjected));
        assert!(effects.contains(&Effect::NextLineConsumed));
        assert!(s.next_line().consumed);
        assert_eq!(s.grid().layout(), vec![(8, 4, 2), (9, 0, 3), (9, 5, 1)]);
    }

    #[test]
    fn test_full_grid_sets_over_without_injecting() {
        let mut cells = vec![(0, 0, 1)];
        cells.extend((1..10).map(|y| (0, y, 1)));
        cells.push((3, 9, 1));
        let mut initial = snapshot(8, 10, &cells);
        initial.next_line = NextLine::new(vec![Segment { x: 0, width: 2 }]);
        let mut s = Session::new(initial, &config());
        let block = s.grid().block_at(3, 9).unwrap().id;
        s.transition(Event::DragStart { block });
        s.transition(Event::DragMove { column: 5 });
        s.transition(Event::DragEnd);
        let before_rows = s.grid().blocks().len();
        let effects = run_turn(&mut s);
        assert!(effects.contains(&Effect::GridFull));
        assert!(!effects.contains(&Effect::LineInjected));
        assert!(s.is_over());
        assert_eq!(s.grid().blocks().len(), before_rows);
        assert_eq!(s.transition(Event::DragStart { block }), Phase::Waiting);
    }

    #[test]
    fn test_gravity_waits_for_animations() {
        let mut s = session(8, 10, &[(0, 8, 2), (3, 9, 1)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 1 });
        s.transition(Event::DragEnd);
        assert_eq!(s.transition(Event::Tick), Phase::Gravity);
        s.transition(Event::AnimationStarted { block: 1 });
        assert_eq!(s.transition(Event::Tick), Phase::Gravity);
        assert_eq!(s.transition(Event::Tick), Phase::Gravity);
        s.transition(Event::AnimationFinished { block: 1 });
        assert_eq!(s.transition(Event::Tick), Phase::LineClear);
    }

    #[test]
    fn test_bonus_path_submits_bonus() {
        let mut initial = snapshot(8, 10, &[(0, 9, 2), (2, 9, 2), (0, 8, 1), (3, 3, 1)]);
        initial.counters.score = 45;
        let mut s = Session::new(initial, &config());
        assert_eq!(s.remaining(Bonus::Hammer), 1);
        s.select_bonus(Bonus::Hammer).unwrap();
        assert_eq!(s.transition(Event::BonusTarget { block: 1 }), Phase::GravityBonus);
        let effects = run_turn(&mut s);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::SubmitBonus(BonusSubmission { kind: 1, row_index: 0, block_index: 0 })
        )));
        assert_eq!(s.remaining(Bonus::Hammer), 0);
        assert_eq!(s.selected_bonus(), Bonus::None);
        // Block 3 dropped into the hammered gap; block 4 came to rest on block 2.
        assert_eq!(s.grid().block_at(0, 9).map(|b| b.id), Some(3));
        assert_eq!(s.grid().block_at(3, 8).map(|b| b.id), Some(4));
    }

    /// Tick until `Waiting`, recording the phase after every tick.
    fn phase_trail(s: &mut Session) -> (Vec<Phase>, Vec<Effect>) {
        let mut trail = Vec::new();
        let mut effects = s.drain_effects();
        for _ in 0..200 {
            let phase = s.transition(Event::Tick);
            effects.extend(s.drain_effects());
            trail.push(phase);
            if phase == Phase::Waiting {
                return (trail, effects);
            }
        }
        panic!("turn never finished, stuck in {:?}", s.phase());
    }

    fn clears(effects: &[Effect]) -> usize {
        effects.iter().filter(|e| matches!(e, Effect::RowsCleared(_))).count()
    }

    #[test]
    fn test_injected_line_completes_row() {
        let mut initial = snapshot(4, 6, &[(0, 5, 1), (2, 5, 1)]);
        initial.next_line = NextLine::new(vec![Segment { x: 1, width: 2 }]);
        let mut s = Session::new(initial, &config());
        let id = s.grid().block_at(2, 5).unwrap().id;
        s.transition(Event::DragStart { block: id });
        s.transition(Event::DragMove { column: 3 });
        s.transition(Event::DragEnd);
        let (trail, effects) = phase_trail(&mut s);
        assert!(trail.windows(2).any(|w| w == [Phase::LineClear2, Phase::Gravity2]));
        assert!(!trail.contains(&Phase::Gravity));
        assert_eq!(clears(&effects), 1);
        assert!(effects.contains(&Effect::Scored(Cascade::from_lines(1))));
        assert_eq!(
            submitted_moves(&effects),
            vec![MoveSubmission { row_index: 0, start_index: 2, final_index: 3 }]
        );
        assert!(s.grid().is_empty());
        assert_eq!(s.counters().score, 1);
    }

    #[test]
    fn test_lines_from_both_cascades_scored_together() {
        let mut initial = snapshot(4, 6, &[(0, 5, 3), (2, 4, 1), (0, 4, 1)]);
        initial.next_line = NextLine::new(vec![Segment { x: 1, width: 3 }]);
        let mut s = Session::new(initial, &config());
        let id = s.grid().block_at(2, 4).unwrap().id;
        s.transition(Event::DragStart { block: id });
        s.transition(Event::DragMove { column: 3 });
        s.transition(Event::DragEnd);
        let (trail, effects) = phase_trail(&mut s);
        assert!(trail.windows(2).any(|w| w == [Phase::LineClear, Phase::Gravity]));
        assert!(trail.windows(2).any(|w| w == [Phase::LineClear2, Phase::Gravity2]));
        assert_eq!(clears(&effects), 2);
        // One cascade of two lines, not two cascades of one.
        let scored: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Scored(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(scored, vec![Cascade { lines: 2, points: 3, combo: 2 }]);
        assert_eq!(s.counters(), Counters { score: 3, combo: 2, max_combo: 2 });
        assert_eq!(submitted_moves(&effects)[0].row_index, 1);
        assert!(s.grid().is_empty());
    }

    #[test]
    fn test_bonus_cascade_clears_and_scores() {
        let mut initial = snapshot(4, 6, &[(0, 5, 3), (3, 5, 1), (3, 4, 1)]);
        initial.counters.score = 40;
        let mut s = Session::new(initial, &config());
        s.select_bonus(Bonus::Hammer).unwrap();
        let target = s.grid().block_at(3, 5).unwrap().id;
        assert_eq!(s.transition(Event::BonusTarget { block: target }), Phase::GravityBonus);
        let (trail, effects) = phase_trail(&mut s);
        assert!(trail.windows(2).any(|w| w == [Phase::LineClearBonus, Phase::GravityBonus]));
        assert_eq!(clears(&effects), 1);
        assert!(effects.contains(&Effect::Scored(Cascade::from_lines(1))));
        assert!(effects.contains(&Effect::SubmitBonus(BonusSubmission {
            kind: Bonus::Hammer.index(),
            row_index: 0,
            block_index: 3,
        })));
        assert!(s.grid().is_empty());
        assert_eq!(s.counters().score, 41);
        assert_eq!(s.remaining(Bonus::Hammer), 0);
    }

    #[test]
    fn test_exhausted_bonus_rejected_at_selection() {
        let mut s = session(8, 10, &[(0, 9, 2)]);
        assert_eq!(s.select_bonus(Bonus::Totem), Err(BonusError::Exhausted(Bonus::Totem)));
        assert_eq!(s.selected_bonus(), Bonus::None);
    }

    #[test]
    fn test_bonus_target_without_bonus_is_ignored() {
        let mut s = session(8, 10, &[(0, 9, 2)]);
        assert_eq!(s.transition(Event::BonusTarget { block: 1 }), Phase::Waiting);
        assert_eq!(s.drain_effects(), vec![Effect::Ignored("no bonus selected")]);
        assert_eq!(s.grid().blocks().len(), 1);
    }

    #[test]
    fn test_identical_authoritative_is_noop_but_confirms() {
        let mut s = session(8, 10, &[(0, 9, 1), (4, 7, 2)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 2 });
        s.transition(Event::DragEnd);
        run_turn(&mut s);
        let local = s.snapshot.clone();
        s.transition(Event::AnimationStarted { block: 2 });
        s.transition(Event::Authoritative(Box::new(local)));
        let effects = s.drain_effects();
        assert!(effects.contains(&Effect::Reconciled { replaced: false }));
        assert!(effects.contains(&Effect::ReleaseBusyAfter(Duration::from_millis(config().settle_delay_ms))));
        assert!(s.is_animating(2));
        assert!(!s.is_awaiting_confirmation());
        assert!(s.is_tx_processing());
        s.transition(Event::BusyReleased);
        assert!(!s.is_tx_processing());
    }

    #[test]
    fn test_authoritative_replaces_and_recomputes_danger() {
        let mut s = session(8, 10, &[(0, 9, 1)]);
        assert!(!s.in_danger());
        let mut auth = snapshot(8, 10, &[(0, 1, 2), (0, 9, 8)]);
        auth.counters = Counters { score: 12, combo: 3, max_combo: 3 };
        s.transition(Event::Authoritative(Box::new(auth)));
        assert!(s.in_danger());
        assert_eq!(s.counters().score, 12);
        assert_eq!(s.grid().layout(), vec![(1, 0, 2), (9, 0, 8)]);
    }

    #[test]
    fn test_authoritative_mid_turn_is_deferred() {
        let mut s = session(8, 10, &[(0, 9, 1), (5, 5, 1)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 1 });
        s.transition(Event::DragEnd);
        let auth = snapshot(8, 10, &[(7, 9, 1)]);
        s.transition(Event::Authoritative(Box::new(auth)));
        assert!(s.drain_effects().contains(&Effect::Deferred));
        assert_eq!(s.grid().blocks().len(), 2);
        run_turn(&mut s);
        assert_eq!(s.grid().layout(), vec![(9, 7, 1)]);
        assert!(s.pending_move().is_none());
    }

    #[test]
    fn test_failed_submission_keeps_optimistic_grid() {
        let mut s = session(8, 10, &[(0, 9, 1)]);
        s.transition(Event::DragStart { block: 1 });
        s.transition(Event::DragMove { column: 3 });
        s.transition(Event::DragEnd);
        run_turn(&mut s);
        s.transition(Event::SubmissionFailed { reason: "timeout".into() });
        assert!(!s.is_tx_processing());
        assert!(!s.is_awaiting_confirmation());
        assert_eq!(s.grid().block(1).unwrap().x, 3);
        assert!(s.drain_effects().contains(&Effect::SubmissionFailed("timeout".into())));
        assert_eq!(s.transition(Event::DragStart { block: 1 }), Phase::Dragging);
    }

    #[test]
    fn test_ticks_ignored_outside_busy_phases() {
        let mut s = session(8, 10, &[(0, 0, 1)]);
        assert_eq!(s.transition(Event::Tick), Phase::Waiting);
        assert_eq!(s.grid().block(1).unwrap().y, 0);
    }
}
