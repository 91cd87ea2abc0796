//! Cell bucket table: per-cell `[start, end)` slot ranges over the sorted index.
//!
//! Rebuilt from scratch every step. Cells with no occupants hold
//! [`EMPTY_CELL`] in both arrays so a stale range from a previous step can
//! never be read back.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::error::FlockError;

/// Sentinel stored in `start`/`end` for cells without agents.
pub const EMPTY_CELL: u32 = u32::MAX;

/// Start/end slot ranges for every grid cell.
///
/// Entries are atomics because the locator pass writes cell ids picked by the
/// data, not by the worker index. Each boundary targets a distinct cell, so
/// relaxed stores are enough; the end of the pass is the synchronization point.
#[derive(Debug)]
pub struct CellBuckets {
    start: Vec<AtomicU32>,
    end: Vec<AtomicU32>,
}

impl CellBuckets {
    /// Allocate a table for `cell_count` cells, all empty.
    pub fn new(cell_count: u32) -> Result<Self, FlockError> {
        Ok(Self {
            start: empty_table(cell_count as usize, "cell start table")?,
            end: empty_table(cell_count as usize, "cell end table")?,
        })
    }

    /// Number of cells covered by the table.
    pub fn cell_count(&self) -> usize {
        self.start.len()
    }

    /// Mark every cell empty.
    pub fn reset(&self, min_len: usize) {
        self.start
            .par_iter()
            .zip(self.end.par_iter())
            .with_min_len(min_len)
            .for_each(|(start, end)| {
                start.store(EMPTY_CELL, Ordering::Relaxed);
                end.store(EMPTY_CELL, Ordering::Relaxed);
            });
    }

    /// Record run boundaries of an ascending cell-id array.
    ///
    /// Slot `i` opens a run when its key differs from slot `i - 1` and closes
    /// one when it differs from slot `i + 1`; the first and last slots always do.
    pub fn locate(&self, sorted_cell_ids: &[u32], min_len: usize) {
        let n = sorted_cell_ids.len();
        sorted_cell_ids
            .par_iter()
            .enumerate()
            .with_min_len(min_len)
            .for_each(|(i, &cell)| {
                let cell = cell as usize;
                if i == 0 || sorted_cell_ids[i - 1] != sorted_cell_ids[i] {
                    self.start[cell].store(i as u32, Ordering::Relaxed);
                }
                if i == n - 1 || sorted_cell_ids[i + 1] != sorted_cell_ids[i] {
                    self.end[cell].store(i as u32 + 1, Ordering::Relaxed);
                }
            });
    }

    /// Raw start entry for `cell` ([`EMPTY_CELL`] when unoccupied).
    #[inline]
    pub fn start(&self, cell: u32) -> u32 {
        self.start[cell as usize].load(Ordering::Relaxed)
    }

    /// Raw end entry for `cell` ([`EMPTY_CELL`] when unoccupied).
    #[inline]
    pub fn end(&self, cell: u32) -> u32 {
        self.end[cell as usize].load(Ordering::Relaxed)
    }

    /// Slot range owned by `cell`, or `None` if it is empty.
    #[inline]
    pub fn range(&self, cell: u32) -> Option<Range<usize>> {
        let start = self.start(cell);
        if start == EMPTY_CELL {
            return None;
        }
        Some(start as usize..self.end(cell) as usize)
    }

    /// Iterate `(cell, range)` over occupied cells.
    pub fn occupied(&self) -> impl Iterator<Item = (u32, Range<usize>)> + '_ {
        (0..self.cell_count() as u32).filter_map(|cell| self.range(cell).map(|r| (cell, r)))
    }
}

fn empty_table(len: usize, buffer: &'static str) -> Result<Vec<AtomicU32>, FlockError> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(len)
        .map_err(|_| FlockError::Allocation {
            buffer,
            bytes: len * std::mem::size_of::<AtomicU32>(),
        })?;
    table.extend((0..len).map(|_| AtomicU32::new(EMPTY_CELL)));
    Ok(table)
}
