//! Filtered forward/backward iteration over a leaf's segments.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cps_common::{Error, Result, SubGridOrigin};
use tracing::{trace, warn};

use super::{Segment, SegmentDirectory, SegmentLoader};
use crate::range::{ElevationRange, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Uninitialized,
    ScanningForward,
    ScanningBackward,
    Exhausted,
}

/// Walks a [`SegmentDirectory`] in time order, skipping segments outside
/// the time and elevation filters without touching their payloads.
///
/// The iterator works from a snapshot of the directory taken at
/// initialisation. [`SegmentIterator::segment_list_extended`] picks up
/// segments added since without restarting the scan.
pub struct SegmentIterator<'a> {
    directory: &'a SegmentDirectory,
    segments: Vec<Arc<Segment>>,
    direction: IterationDirection,
    state: IteratorState,
    cursor: isize,
    time_range: TimeRange,
    elevation_range: Option<ElevationRange>,
    loader: Option<(&'a dyn SegmentLoader, SubGridOrigin)>,
    skip_unreadable: bool,
    cache_stamp: Option<u64>,
    current: Option<Arc<Segment>>,
    // Survives exhaustion so a later list extension resumes after it.
    last_yielded: Option<Arc<Segment>>,
}

impl<'a> SegmentIterator<'a> {
    pub fn new(directory: &'a SegmentDirectory, direction: IterationDirection) -> Self {
        Self {
            directory,
            segments: Vec::new(),
            direction,
            state: IteratorState::Uninitialized,
            cursor: -1,
            time_range: TimeRange::all(),
            elevation_range: None,
            loader: None,
            skip_unreadable: false,
            cache_stamp: None,
            current: None,
            last_yielded: None,
        }
    }

    /// Load non-resident segments for `origin` through `loader` when they
    /// are selected.
    pub fn with_loader(mut self, loader: &'a dyn SegmentLoader, origin: SubGridOrigin) -> Self {
        self.loader = Some((loader, origin));
        self
    }

    /// Skip segments whose load fails with a storage-level error.
    pub fn skip_unreadable_segments(mut self, skip: bool) -> Self {
        self.skip_unreadable = skip;
        self
    }

    pub fn set_time_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.time_range = TimeRange::new(start, end);
    }

    pub fn set_elevation_range(&mut self, min: f32, max: f32) {
        self.elevation_range = Some(ElevationRange::new(min, max));
    }

    /// Stamp every segment selected from now on with `stamp`.
    pub fn mark_cache_stamp(&mut self, stamp: u64) {
        self.cache_stamp = Some(stamp);
    }

    pub fn direction(&self) -> IterationDirection {
        self.direction
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Index of the last yielded segment in the current snapshot.
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// Number of segments in the current snapshot.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn current(&self) -> Option<&Arc<Segment>> {
        self.current.as_ref()
    }

    /// Snapshot the directory and park the cursor just outside it.
    pub fn initialise(&mut self) {
        self.segments = self.directory.snapshot();
        self.current = None;
        self.last_yielded = None;
        match self.direction {
            IterationDirection::Forward => {
                self.cursor = -1;
                self.state = IteratorState::ScanningForward;
            }
            IterationDirection::Backward => {
                self.cursor = self.segments.len() as isize;
                self.state = IteratorState::ScanningBackward;
            }
        }
    }

    /// Restart from the beginning (or end) and yield the first match.
    pub fn move_to_first(&mut self) -> Result<Option<Arc<Segment>>> {
        self.initialise();
        self.move_next()
    }

    /// Advance to the next segment passing the filters, loading its payload
    /// if needed. `Ok(None)` once exhausted.
    pub fn move_next(&mut self) -> Result<Option<Arc<Segment>>> {
        if self.state == IteratorState::Uninitialized {
            self.initialise();
        }

        loop {
            if self.state == IteratorState::Exhausted {
                self.current = None;
                return Ok(None);
            }

            self.cursor += match self.direction {
                IterationDirection::Forward => 1,
                IterationDirection::Backward => -1,
            };
            let Some(segment) = usize::try_from(self.cursor)
                .ok()
                .and_then(|i| self.segments.get(i))
                .cloned()
            else {
                self.state = IteratorState::Exhausted;
                continue;
            };

            if segment.is_retired() {
                // Cleaved by a writer after the snapshot; its halves
                // replace it in the directory.
                self.resnapshot(Some(&segment), true);
                continue;
            }
            if !self.passes_filters(&segment) {
                trace!(start = %segment.start_time(), "segment filtered out");
                continue;
            }

            match self.materialize(&segment) {
                Ok(()) => {}
                Err(_) if segment.is_retired() => {
                    self.resnapshot(Some(&segment), true);
                    continue;
                }
                Err(e) if self.skip_unreadable && e.is_segment_io() => {
                    warn!(
                        error = %e,
                        start = %segment.start_time(),
                        end = %segment.end_time(),
                        "skipping unreadable segment"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }

            if let Some(stamp) = self.cache_stamp {
                segment.touch(stamp);
            }
            self.current = Some(Arc::clone(&segment));
            self.last_yielded = Some(Arc::clone(&segment));
            return Ok(Some(segment));
        }
    }

    /// Re-read the directory after a writer added segments, keeping the
    /// scan position. An exhausted iterator resumes with segments added
    /// past the last one it yielded.
    pub fn segment_list_extended(&mut self) {
        let last = self.last_yielded.clone();
        self.resnapshot(last.as_ref(), false);
    }

    /// Re-read the directory and step back over the last yielded segment,
    /// so that the segments replacing it are yielded next. Used when that
    /// segment was cleaved before its payload could be read.
    pub fn rescan_current(&mut self) {
        if let Some(last) = self.current.take() {
            self.resnapshot(Some(&last), true);
        }
    }

    fn resnapshot(&mut self, anchor: Option<&Arc<Segment>>, revisit_anchor: bool) {
        self.segments = self.directory.snapshot();
        let Some(anchor) = anchor else {
            // Nothing yielded yet, so scanning from the start repeats nothing.
            match self.direction {
                IterationDirection::Forward => {
                    self.cursor = -1;
                    if self.state == IteratorState::Exhausted {
                        self.state = IteratorState::ScanningForward;
                    }
                }
                IterationDirection::Backward => {
                    self.cursor = self.segments.len() as isize;
                    if self.state == IteratorState::Exhausted {
                        self.state = IteratorState::ScanningBackward;
                    }
                }
            }
            return;
        };

        // Segments are time-disjoint, so the scan position is recovered
        // from the anchor's time range.
        self.cursor = match (self.direction, revisit_anchor) {
            (IterationDirection::Forward, false) => {
                self.count_where(|s| s.end_time() <= anchor.end_time()) - 1
            }
            (IterationDirection::Forward, true) => {
                self.count_where(|s| s.end_time() <= anchor.start_time()) - 1
            }
            (IterationDirection::Backward, false) => {
                self.segments.len() as isize
                    - self.count_where(|s| s.start_time() >= anchor.start_time())
            }
            (IterationDirection::Backward, true) => {
                self.segments.len() as isize
                    - self.count_where(|s| s.start_time() >= anchor.end_time())
            }
        };
        if self.state == IteratorState::Exhausted {
            self.state = match self.direction {
                IterationDirection::Forward => IteratorState::ScanningForward,
                IterationDirection::Backward => IteratorState::ScanningBackward,
            };
        }
    }

    fn count_where(&self, f: impl Fn(&Segment) -> bool) -> isize {
        self.segments.iter().filter(|s| f(s)).count() as isize
    }

    fn passes_filters(&self, segment: &Segment) -> bool {
        if !segment.time_range().overlaps(&self.time_range) {
            return false;
        }
        match self.elevation_range {
            Some(query) => segment
                .elevation_range()
                .is_some_and(|range| range.overlaps(&query)),
            None => true,
        }
    }

    fn materialize(&self, segment: &Segment) -> Result<()> {
        if segment.is_resident() {
            return Ok(());
        }
        match self.loader {
            Some((loader, origin)) => segment.ensure_resident(origin, loader),
            None => Err(Error::SegmentUnavailable(format!(
                "segment starting {} is not resident and no loader is set",
                segment.start_time()
            ))),
        }
    }
}
