//! Wire form of the authoritative state.
//!
//! Each row is a `u32` with three bits per column, column 0 in the highest slot.
//! A cell holds the width of the block covering it, or 0 when empty, so a width-2 block
//! at column 0 of an 8-wide row reads `2 2 0 0 0 0 0 0`. Rows are listed bottom row first.

use crate::bonus::BonusUses;
use crate::counters::Counters;
use crate::grid::{GridError, GridSnapshot, NextLine, Segment};
use crate::reconcile::Snapshot;
use thiserror::Error;

pub const BITS_PER_CELL: usize = 3;
const CELL_MASK: u32 = 0b111;
/// Widest row a `u32` can hold.
pub const MAX_WIDTH: usize = 32 / BITS_PER_CELL;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("grid width {0} does not fit in a packed row (max {MAX_WIDTH})")]
    TooWide(usize),
    #[error("{rows} packed rows for a grid of height {height}")]
    TooManyRows { rows: usize, height: usize },
    #[error("row {row}: block of width {width} at column {column} runs past the edge")]
    Overrun { row: usize, column: usize, width: usize },
    #[error("row {row}: bits set beyond column {width}")]
    StrayBits { row: usize, width: usize },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Authoritative state as the backend sends it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireSnapshot {
    /// One packed row per grid row, bottom row first. Missing rows are empty.
    pub rows: Vec<u32>,
    pub next_row: u32,
    pub score: u32,
    pub combo: u32,
    pub max_combo: u32,
    pub over: bool,
    pub hammer_used: u32,
    pub wave_used: u32,
    pub totem_used: u32,
}

#[inline]
fn shift(column: usize, width: usize) -> usize {
    BITS_PER_CELL * (width - 1 - column)
}

/// Split one packed row into `(x, width)` runs.
pub fn unpack_row(bits: u32, width: usize, row: usize) -> Result<Vec<Segment>, DecodeError> {
    if width > MAX_WIDTH {
        return Err(DecodeError::TooWide(width));
    }
    if width < MAX_WIDTH && bits >> (BITS_PER_CELL * width) != 0 {
        return Err(DecodeError::StrayBits { row, width });
    }
    let mut segments = Vec::new();
    let mut x = 0;
    while x < width {
        let w = ((bits >> shift(x, width)) & CELL_MASK) as usize;
        if w == 0 {
            x += 1;
            continue;
        }
        if x + w > width {
            return Err(DecodeError::Overrun { row, column: x, width: w });
        }
        segments.push(Segment { x, width: w });
        x += w;
    }
    Ok(segments)
}

/// Pack `(x, width)` runs into a row. Widths above 7 do not fit a cell and are truncated.
pub fn pack_row<I>(segments: I, width: usize) -> u32
where
    I: IntoIterator<Item = Segment>,
{
    let mut bits = 0;
    for seg in segments {
        let value = seg.width as u32 & CELL_MASK;
        for x in seg.x..(seg.x + seg.width).min(width) {
            bits |= value << shift(x, width);
        }
    }
    bits
}

impl WireSnapshot {
    /// Decode into a fresh snapshot; block ids are assigned bottom row first, left to right.
    pub fn decode(&self, width: usize, height: usize) -> Result<Snapshot, DecodeError> {
        if width > MAX_WIDTH {
            return Err(DecodeError::TooWide(width));
        }
        if self.rows.len() > height {
            return Err(DecodeError::TooManyRows {
                rows: self.rows.len(),
                height,
            });
        }
        let mut grid = GridSnapshot::new(width, height);
        for (from_bottom, &bits) in self.rows.iter().enumerate() {
            let y = height - 1 - from_bottom;
            for seg in unpack_row(bits, width, y)? {
                grid.insert(seg.x, y, seg.width)?;
            }
        }
        let next_line = NextLine::new(unpack_row(self.next_row, width, height)?);
        Ok(Snapshot {
            grid,
            next_line,
            counters: Counters {
                score: self.score,
                combo: self.combo,
                max_combo: self.max_combo,
            },
            over: self.over,
            bonuses_used: BonusUses {
                hammer: self.hammer_used,
                wave: self.wave_used,
                totem: self.totem_used,
            },
        })
    }

    pub fn encode(snapshot: &Snapshot) -> Self {
        let grid = &snapshot.grid;
        let rows = (0..grid.height)
            .rev()
            .map(|y| {
                let row = grid.blocks().iter().filter(|b| b.y == y).map(|b| Segment {
                    x: b.x,
                    width: b.width,
                });
                pack_row(row, grid.width)
            })
            .collect();
        Self {
            rows,
            next_row: pack_row(snapshot.next_line.segments.iter().copied(), grid.width),
            score: snapshot.counters.score,
            combo: snapshot.counters.combo,
            max_combo: snapshot.counters.max_combo,
            over: snapshot.over,
            hammer_used: snapshot.bonuses_used.hammer,
            wave_used: snapshot.bonuses_used.wave,
            totem_used: snapshot.bonuses_used.totem,
        }
    }
}
