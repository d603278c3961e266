//! Per-cell pass arrays for one 32×32 leaf segment.
//!
//! Each of the 1024 cells owns a vector of [`CellPass`] kept in
//! non-decreasing time order. Lookups by time are binary searches; inserts
//! that arrive out of order are placed at their sorted position after any
//! passes with the same time.

mod integrate;
mod wire;

use chrono::{DateTime, Utc};
use cps_common::consts::{SUBGRID_TREE_CELLS_PER_SUBGRID, SUBGRID_TREE_DIMENSION};

use crate::cell_pass::CellPass;
use crate::range::ElevationRange;

pub use integrate::IntegrationCounts;

/// Cells along one side of the store.
pub const DIM: usize = SUBGRID_TREE_DIMENSION as usize;

/// A fully materialized 32×32 set of pass sequences, indexed `[x][y]`.
pub type CellPassGrid = [[Vec<CellPass>; DIM]; DIM];

/// Build an empty [`CellPassGrid`].
pub fn empty_grid() -> Box<CellPassGrid> {
    Box::new(std::array::from_fn(|_| std::array::from_fn(|_| Vec::new())))
}

#[inline]
fn cell_index(x: usize, y: usize) -> usize {
    assert!(x < DIM && y < DIM, "cell ({x}, {y}) outside 32x32 segment");
    x * DIM + y
}

/// Time-ordered pass arrays for every cell of a leaf segment.
#[derive(Debug, Clone, PartialEq)]
pub struct PassArrayStore {
    cells: Vec<Vec<CellPass>>,
}

impl Default for PassArrayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PassArrayStore {
    pub fn new() -> Self {
        Self {
            cells: vec![Vec::new(); SUBGRID_TREE_CELLS_PER_SUBGRID],
        }
    }

    /// Number of passes in cell `(x, y)`.
    ///
    /// # Panics
    ///
    /// Every per-cell method panics if `x` or `y` is not below 32.
    pub fn pass_count(&self, x: usize, y: usize) -> usize {
        self.cells[cell_index(x, y)].len()
    }

    /// Total passes across all cells.
    pub fn total_pass_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

    /// Replace the cell's contents with `count` NULL passes.
    pub fn allocate_passes(&mut self, x: usize, y: usize, count: usize) {
        let cell = &mut self.cells[cell_index(x, y)];
        cell.clear();
        cell.resize(count, CellPass::null());
    }

    /// Add a pass, keeping the cell in time order.
    ///
    /// A pass at or after the latest time is appended; an earlier one is
    /// inserted after every pass whose time is not later than its own.
    pub fn add_pass(&mut self, x: usize, y: usize, pass: CellPass) {
        let cell = &mut self.cells[cell_index(x, y)];
        match cell.last() {
            Some(last) if last.time > pass.time => {
                let at = cell.partition_point(|p| p.time <= pass.time);
                cell.insert(at, pass);
            }
            _ => cell.push(pass),
        }
    }

    /// Overwrite the pass at `index`, returning the previous value.
    ///
    /// The caller must keep the cell in time order.
    pub fn replace_pass(
        &mut self,
        x: usize,
        y: usize,
        index: usize,
        pass: CellPass,
    ) -> Option<CellPass> {
        let slot = self.cells[cell_index(x, y)].get_mut(index)?;
        Some(std::mem::replace(slot, pass))
    }

    pub fn pass(&self, x: usize, y: usize, index: usize) -> Option<&CellPass> {
        self.cells[cell_index(x, y)].get(index)
    }

    /// Copy of the pass at `index`.
    pub fn extract_cell_pass(&self, x: usize, y: usize, index: usize) -> Option<CellPass> {
        self.pass(x, y, index).copied()
    }

    /// Copy of the cell's whole ordered history.
    pub fn extract_cell_passes(&self, x: usize, y: usize) -> Vec<CellPass> {
        self.cells[cell_index(x, y)].clone()
    }

    /// Borrow the cell's ordered history.
    pub fn cell_passes(&self, x: usize, y: usize) -> &[CellPass] {
        &self.cells[cell_index(x, y)]
    }

    pub fn pass_height(&self, x: usize, y: usize, index: usize) -> Option<f32> {
        self.pass(x, y, index).map(|p| p.height)
    }

    pub fn pass_time(&self, x: usize, y: usize, index: usize) -> Option<DateTime<Utc>> {
        self.pass(x, y, index).map(|p| p.time)
    }

    /// Find the pass describing the cell's state as of `time`.
    ///
    /// Returns `(exact, index)`: `index` is the last pass whose time is at
    /// or before `time` (`None` when `time` precedes every pass), and
    /// `exact` is true when that pass's time equals `time`.
    pub fn locate_time(&self, x: usize, y: usize, time: DateTime<Utc>) -> (bool, Option<usize>) {
        let cell = &self.cells[cell_index(x, y)];
        match cell.partition_point(|p| p.time <= time) {
            0 => (false, None),
            n => (cell[n - 1].time == time, Some(n - 1)),
        }
    }

    /// Bulk replace every cell from a materialized grid.
    ///
    /// Cells supplied out of time order are stably sorted.
    pub fn set_state(&mut self, grid: Box<CellPassGrid>) {
        let mut cells = Vec::with_capacity(SUBGRID_TREE_CELLS_PER_SUBGRID);
        for column in *grid {
            for mut passes in column {
                if !passes.is_sorted_by_key(|p| p.time) {
                    passes.sort_by_key(|p| p.time);
                }
                cells.push(passes);
            }
        }
        self.cells = cells;
    }

    /// Min/max of all non-NULL heights, if any.
    pub fn elevation_range(&self) -> Option<ElevationRange> {
        let mut range: Option<ElevationRange> = None;
        for pass in self.cells.iter().flatten().filter(|p| p.has_height()) {
            match range.as_mut() {
                Some(r) => r.include(pass.height),
                None => range = Some(ElevationRange::point(pass.height)),
            }
        }
        range
    }

    /// Time at which to split this store into two halves of roughly equal
    /// pass counts. `None` when every pass shares one instant.
    pub fn median_time(&self) -> Option<DateTime<Utc>> {
        let mut times: Vec<DateTime<Utc>> =
            self.cells.iter().flatten().map(|p| p.time).collect();
        if times.len() < 2 {
            return None;
        }
        let mid = times.len() / 2;
        let (_, median, _) = times.select_nth_unstable(mid);
        let median = *median;
        let first = times.iter().min().copied()?;
        // Every pass before the split must be strictly earlier than it.
        if median > first {
            Some(median)
        } else {
            times.into_iter().filter(|t| *t > first).min()
        }
    }

    /// Partition into passes strictly before `time` and passes at or after it.
    pub fn split_at_time(self, time: DateTime<Utc>) -> (PassArrayStore, PassArrayStore) {
        let mut before = Vec::with_capacity(SUBGRID_TREE_CELLS_PER_SUBGRID);
        let mut after = Vec::with_capacity(SUBGRID_TREE_CELLS_PER_SUBGRID);
        for mut cell in self.cells {
            let at = cell.partition_point(|p| p.time < time);
            after.push(cell.split_off(at));
            before.push(cell);
        }
        (PassArrayStore { cells: before }, PassArrayStore { cells: after })
    }

    /// Iterate `(x, y, passes)` over non-empty cells.
    pub fn non_empty_cells(&self) -> impl Iterator<Item = (usize, usize, &[CellPass])> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(|(i, c)| (i / DIM, i % DIM, c.as_slice()))
    }
}
