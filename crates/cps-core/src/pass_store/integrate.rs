//! Merge an externally collected pass history into a cell.

use super::{cell_index, PassArrayStore};
use crate::cell_pass::CellPass;
use crate::range::ElevationRange;

/// Outcome of [`PassArrayStore::integrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationCounts {
    pub added: usize,
    pub modified: usize,
}

impl PassArrayStore {
    /// Merge `incoming` into cell `(x, y)`.
    ///
    /// A pass whose `(machine_id, time)` matches an existing pass replaces it
    /// in place (`modified`); any other pass is inserted at its time position
    /// after existing passes of the same time (`added`).
    ///
    /// Incoming passes with a height outside `elevation_filter` are skipped.
    /// When `replace_elevation` is false, a modified pass keeps the height
    /// already stored.
    ///
    /// Runs as a single merge over both sequences, so the cost is linear in
    /// the combined length plus a binary search per incoming pass.
    pub fn integrate(
        &mut self,
        x: usize,
        y: usize,
        incoming: &[CellPass],
        replace_elevation: bool,
        elevation_filter: Option<ElevationRange>,
    ) -> IntegrationCounts {
        self.integrate_tracked(x, y, incoming, replace_elevation, elevation_filter)
            .0
    }

    /// [`PassArrayStore::integrate`], also returning the range of the
    /// non-NULL heights it actually stored. A modified pass that keeps its
    /// stored height contributes nothing.
    pub fn integrate_tracked(
        &mut self,
        x: usize,
        y: usize,
        incoming: &[CellPass],
        replace_elevation: bool,
        elevation_filter: Option<ElevationRange>,
    ) -> (IntegrationCounts, Option<ElevationRange>) {
        let mut counts = IntegrationCounts::default();
        let mut stored: Option<ElevationRange> = None;
        let mut record = |pass: &CellPass| {
            if pass.has_height() {
                stored = ElevationRange::union(stored, Some(ElevationRange::point(pass.height)));
            }
        };

        let mut sorted: Vec<CellPass> = incoming
            .iter()
            .filter(|p| match elevation_filter {
                Some(range) => !p.has_height() || range.contains(p.height),
                None => true,
            })
            .copied()
            .collect();
        if sorted.is_empty() {
            return (counts, None);
        }
        if !sorted.is_sorted_by_key(|p| p.time) {
            sorted.sort_by_key(|p| p.time);
        }

        let cell = &mut self.cells[cell_index(x, y)];
        let existing = std::mem::take(cell);
        let mut merged: Vec<CellPass> = Vec::with_capacity(existing.len() + sorted.len());
        let mut existing = existing.into_iter().peekable();

        for pass in sorted {
            while let Some(next) = existing.next_if(|e| e.time <= pass.time) {
                merged.push(next);
            }

            let same_time = merged.partition_point(|p| p.time < pass.time);
            let matching = merged[same_time..]
                .iter()
                .position(|p| p.machine_id == pass.machine_id)
                .map(|i| same_time + i);

            match matching {
                Some(i) => {
                    let kept_height = merged[i].height;
                    merged[i] = pass;
                    if replace_elevation {
                        record(&pass);
                    } else {
                        merged[i].height = kept_height;
                    }
                    counts.modified += 1;
                }
                None => {
                    record(&pass);
                    merged.push(pass);
                    counts.added += 1;
                }
            }
        }
        merged.extend(existing);

        *cell = merged;
        (counts, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, d, 0, 0, 0).unwrap()
    }

    fn pass(machine: i32, d: u32, height: f32) -> CellPass {
        CellPass {
            height,
            ..CellPass::at(machine, day(d))
        }
    }

    #[test]
    fn integrate_new_pass_adds() {
        let mut store = PassArrayStore::new();
        store.add_pass(4, 4, pass(1, 1, 10.0));

        let counts = store.integrate(4, 4, &[pass(1, 2, 11.0)], true, None);

        assert_eq!(counts, IntegrationCounts { added: 1, modified: 0 });
        assert_eq!(store.pass_count(4, 4), 2);
    }

    #[test]
    fn integrate_same_key_modifies_in_place() {
        let mut store = PassArrayStore::new();
        store.add_pass(0, 0, pass(1, 1, 10.0));
        store.add_pass(0, 0, pass(2, 1, 20.0));
        store.add_pass(0, 0, pass(1, 3, 30.0));

        let mut corrected = pass(2, 1, 21.0);
        corrected.ccv = 500;
        let counts = store.integrate(0, 0, &[corrected], true, None);

        assert_eq!(counts, IntegrationCounts { added: 0, modified: 1 });
        assert_eq!(store.pass_count(0, 0), 3);
        assert_eq!(store.extract_cell_pass(0, 0, 1), Some(corrected));
    }

    #[test]
    fn integrate_keeps_height_without_replace_elevation() {
        let mut store = PassArrayStore::new();
        store.add_pass(0, 0, pass(1, 1, 10.0));

        let mut corrected = pass(1, 1, 99.0);
        corrected.mdp = 42;
        store.integrate(0, 0, &[corrected], false, None);

        let stored = store.extract_cell_pass(0, 0, 0).expect("pass");
        assert_eq!(stored.height, 10.0);
        assert_eq!(stored.mdp, 42);
    }

    #[test]
    fn tracked_heights_skip_kept_elevations() {
        let mut store = PassArrayStore::new();
        store.add_pass(0, 0, pass(1, 1, 10.0));

        let incoming = [pass(1, 1, 99.0), pass(1, 2, 12.0), CellPass::at(1, day(3))];
        let (counts, heights) = store.integrate_tracked(0, 0, &incoming, false, None);
        assert_eq!(counts, IntegrationCounts { added: 2, modified: 1 });
        assert_eq!(heights, Some(ElevationRange::point(12.0)));

        let (_, heights) = store.integrate_tracked(0, 0, &[pass(1, 1, 99.0)], true, None);
        assert_eq!(heights, Some(ElevationRange::point(99.0)));
    }

    #[test]
    fn integrate_interleaves_and_keeps_order() {
        let mut store = PassArrayStore::new();
        for d in [2, 4, 6] {
            store.add_pass(0, 0, pass(1, d, d as f32));
        }

        let incoming = [pass(2, 5, 0.0), pass(2, 1, 0.0), pass(1, 4, 40.0), pass(2, 7, 0.0)];
        let counts = store.integrate(0, 0, &incoming, true, None);

        assert_eq!(counts, IntegrationCounts { added: 3, modified: 1 });
        let passes = store.extract_cell_passes(0, 0);
        let days: Vec<u32> = passes
            .iter()
            .map(|p| chrono::Datelike::day(&p.time))
            .collect();
        assert_eq!(days, vec![1, 2, 4, 5, 6, 7]);
        assert_eq!(passes[2].height, 40.0);
    }

    #[test]
    fn integrate_applies_elevation_filter() {
        let mut store = PassArrayStore::new();
        let incoming = [pass(1, 1, 5.0), pass(1, 2, 50.0), CellPass::at(1, day(3))];

        let counts = store.integrate(
            0,
            0,
            &incoming,
            true,
            Some(ElevationRange::new(0.0, 10.0)),
        );

        // The NULL-height pass is not an elevation outlier.
        assert_eq!(counts.added, 2);
        assert_eq!(store.pass_count(0, 0), 2);
    }

    #[test]
    fn integrate_duplicate_incoming_keys_collapse() {
        let mut store = PassArrayStore::new();
        let counts = store.integrate(0, 0, &[pass(1, 1, 1.0), pass(1, 1, 2.0)], true, None);
        assert_eq!(counts, IntegrationCounts { added: 1, modified: 1 });
        assert_eq!(store.pass_height(0, 0, 0), Some(2.0));
    }

    #[test]
    fn integrate_nothing_is_noop() {
        let mut store = PassArrayStore::new();
        store.add_pass(0, 0, pass(1, 1, 1.0));
        let counts = store.integrate(0, 0, &[], true, None);
        assert_eq!(counts, IntegrationCounts::default());
        assert_eq!(store.pass_count(0, 0), 1);
    }
}
