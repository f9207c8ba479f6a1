//! Stand-in for the game backend: owns the authoritative state on a worker thread.
//!
//! Submissions go in over a channel; after the configured latency the worker replies with the
//! packed authoritative snapshot or a rejection. The app polls for replies between frames.

use crate::GameConfig;
use crate::bitfield::WireSnapshot;
use crate::counters::Cascade;
use crate::grid::{GridSnapshot, NextLine};
use crate::linegen::LineGen;
use crate::reconcile::Snapshot;
use crate::session::{BonusSubmission, MoveSubmission};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Rows laid down before the first move.
const INITIAL_ROWS: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no block starts at column {column} of row {row}")]
    NoBlock { row: usize, column: usize },
    #[error("cannot slide block to column {column}")]
    Blocked { column: usize },
    #[error("{0} has no uses left")]
    BonusExhausted(&'static str),
    #[error("no bonus selected")]
    NoBonus,
    #[error("game is over")]
    GameOver,
    #[error("submission {0} dropped")]
    Dropped(u32),
    #[error("backend worker stopped")]
    Disconnected,
}

/// Reply to one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Confirmed(WireSnapshot),
    /// `state` is the authoritative state after the rejection, when the backend can still report it.
    Rejected {
        error: BackendError,
        state: Option<WireSnapshot>,
    },
}

/// Where submissions go and confirmations come from.
pub trait Backend {
    /// Authoritative state at game start.
    fn state(&self) -> WireSnapshot;
    fn submit_move(&mut self, submission: MoveSubmission) -> Result<(), BackendError>;
    fn submit_bonus(&mut self, submission: BonusSubmission) -> Result<(), BackendError>;
    /// Next reply, if one has arrived. Never blocks.
    fn poll(&mut self) -> Option<Outcome>;
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Move(MoveSubmission),
    Bonus(BonusSubmission),
}

/// Authoritative game state and the rules that advance it.
#[derive(Debug, Clone)]
pub struct Ledger {
    state: Snapshot,
    lines: LineGen,
    submissions: u32,
    fail_every: Option<u32>,
}

impl Ledger {
    pub fn new(config: &GameConfig) -> Self {
        let mut lines = LineGen::new(config.seed);
        let mut state = Snapshot::empty(config.width, config.height);
        for _ in 0..INITIAL_ROWS.min(config.height.saturating_sub(1)) {
            let mut line = NextLine::new(lines.next_line(config.width));
            if state.grid.inject(&mut line).is_err() {
                break;
            }
            resolve(&mut state.grid);
        }
        state.next_line = NextLine::new(lines.next_line(config.width));
        Self {
            state,
            lines,
            submissions: 0,
            fail_every: config.fail_every.filter(|&n| n > 0),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.state
    }

    pub fn wire(&self) -> WireSnapshot {
        WireSnapshot::encode(&self.state)
    }

    fn take_ticket(&mut self) -> Result<(), BackendError> {
        self.submissions += 1;
        match self.fail_every {
            Some(n) if self.submissions % n == 0 => Err(BackendError::Dropped(self.submissions)),
            _ if self.state.over => Err(BackendError::GameOver),
            _ => Ok(()),
        }
    }

    /// Slide, settle, clear, inject the next line, settle and clear again.
    pub fn apply_move(&mut self, m: MoveSubmission) -> Result<(), BackendError> {
        self.take_ticket()?;
        let grid = &mut self.state.grid;
        let row = grid.height.checked_sub(1 + m.row_index).ok_or(BackendError::NoBlock {
            row: m.row_index,
            column: m.start_index,
        })?;
        let block = grid
            .block_at(m.start_index, row)
            .filter(|b| b.x == m.start_index)
            .copied()
            .ok_or(BackendError::NoBlock {
                row: m.row_index,
                column: m.start_index,
            })?;
        if m.final_index + block.width > grid.width || !grid.slide_path_clear(block.id, m.final_index) {
            return Err(BackendError::Blocked {
                column: m.final_index,
            });
        }
        grid.move_block(block.id, m.final_index);

        let mut lines = resolve(grid);
        if m.final_index != m.start_index {
            if grid.inject(&mut self.state.next_line).is_err() {
                self.state.over = true;
            }
            lines += resolve(grid);
            self.state.next_line = NextLine::new(self.lines.next_line(grid.width));
        }
        self.state.counters.apply(Cascade::from_lines(lines));
        Ok(())
    }

    /// Apply a bonus aimed at the block starting at `block_index` on `row_index`.
    pub fn apply_bonus(&mut self, b: BonusSubmission) -> Result<(), BackendError> {
        self.take_ticket()?;
        let bonus = b.bonus();
        if bonus.is_none() {
            return Err(BackendError::NoBonus);
        }
        let counters = self.state.counters;
        let used = self.state.bonuses_used.get(bonus);
        if bonus.remaining(counters.score, counters.combo, used) == 0 {
            return Err(BackendError::BonusExhausted(bonus.name()));
        }
        let grid = &mut self.state.grid;
        let missing = BackendError::NoBlock {
            row: b.row_index,
            column: b.block_index,
        };
        let row = grid.height.checked_sub(1 + b.row_index).ok_or(missing.clone())?;
        let target = grid
            .block_at(b.block_index, row)
            .filter(|t| t.x == b.block_index)
            .copied()
            .ok_or(missing)?;
        bonus
            .apply(&target, grid)
            .map_err(|_| BackendError::NoBonus)?;
        let lines = resolve(grid);
        self.state.counters.apply(Cascade::from_lines(lines));
        self.state.bonuses_used.spend(bonus);
        Ok(())
    }

    fn handle(&mut self, request: Request) -> Outcome {
        let result = match request {
            Request::Move(m) => self.apply_move(m),
            Request::Bonus(b) => self.apply_bonus(b),
        };
        match result {
            Ok(()) => Outcome::Confirmed(self.wire()),
            Err(error) => Outcome::Rejected {
                error,
                state: Some(self.wire()),
            },
        }
    }
}

/// Settle and clear until nothing changes. Returns the rows cleared.
fn resolve(grid: &mut GridSnapshot) -> u32 {
    let mut lines = 0;
    loop {
        grid.settle();
        let cleared = grid.clear_complete_rows().count();
        if cleared == 0 {
            return lines;
        }
        lines += cleared as u32;
    }
}

/// [`Ledger`] behind a worker thread with simulated latency.
pub struct LocalAuthority {
    requests: Option<Sender<Request>>,
    replies: Receiver<Outcome>,
    initial: WireSnapshot,
    worker: Option<JoinHandle<()>>,
}

impl LocalAuthority {
    pub fn spawn(config: &GameConfig) -> Self {
        let mut ledger = Ledger::new(config);
        let initial = ledger.wire();
        let latency = Duration::from_millis(config.latency_ms);
        let (req_tx, req_rx) = mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            for request in req_rx {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                if reply_tx.send(ledger.handle(request)).is_err() {
                    break;
                }
            }
        });
        Self {
            requests: Some(req_tx),
            replies: reply_rx,
            initial,
            worker: Some(worker),
        }
    }

    fn send(&self, request: Request) -> Result<(), BackendError> {
        self.requests
            .as_ref()
            .ok_or(BackendError::Disconnected)?
            .send(request)
            .map_err(|_| BackendError::Disconnected)
    }
}

impl Backend for LocalAuthority {
    fn state(&self) -> WireSnapshot {
        self.initial.clone()
    }

    fn submit_move(&mut self, submission: MoveSubmission) -> Result<(), BackendError> {
        self.send(Request::Move(submission))
    }

    fn submit_bonus(&mut self, submission: BonusSubmission) -> Result<(), BackendError> {
        self.send(Request::Bonus(submission))
    }

    fn poll(&mut self) -> Option<Outcome> {
        match self.replies.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Outcome::Rejected {
                error: BackendError::Disconnected,
                state: None,
            }),
        }
    }
}

impl Drop for LocalAuthority {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
