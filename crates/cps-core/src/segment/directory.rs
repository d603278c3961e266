//! The ordered, time-disjoint list of segments belonging to one leaf.

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use cps_common::{check_pass_time, max_time, min_time, Error, Result};
use tracing::debug;

use super::{Segment, SegmentDescriptor};
use crate::range::TimeRange;
use crate::sync;

/// Segments of one leaf subgrid, sorted by start time.
///
/// Appending or replacing segments takes the directory lock only; payload
/// mutation takes the per-segment payload lock only. Readers snapshot the
/// list and never hold the directory lock while touching a payload.
#[derive(Debug, Default)]
pub struct SegmentDirectory {
    segments: RwLock<Vec<Arc<Segment>>>,
    retired: Mutex<Vec<Arc<Segment>>>,
}

impl SegmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted descriptors; payloads stay unloaded.
    pub fn from_descriptors(descriptors: &[SegmentDescriptor]) -> Result<Self> {
        let mut segments = descriptors
            .iter()
            .map(|d| Segment::from_descriptor(d).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        segments.sort_by_key(|s| s.start_time());
        if let Some(pair) = segments
            .windows(2)
            .find(|w| w[0].end_time() > w[1].start_time())
        {
            return Err(Error::decoding(format!(
                "segments overlap at {}",
                pair[1].start_time()
            )));
        }
        Ok(Self {
            segments: RwLock::new(segments),
            retired: Mutex::new(Vec::new()),
        })
    }

    pub fn descriptors(&self) -> Vec<SegmentDescriptor> {
        sync::read(&self.segments)
            .iter()
            .map(|s| s.descriptor())
            .collect()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.segments).len()
    }

    pub fn is_empty(&self) -> bool {
        sync::read(&self.segments).is_empty()
    }

    /// Current segment list. Later appends are not reflected.
    pub fn snapshot(&self) -> Vec<Arc<Segment>> {
        sync::read(&self.segments).clone()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Segment>> {
        sync::read(&self.segments).get(index).cloned()
    }

    pub fn total_pass_count(&self) -> usize {
        sync::read(&self.segments).iter().map(|s| s.pass_count()).sum()
    }

    /// The segment whose range contains `time`, creating one if needed.
    ///
    /// The first write to an empty directory creates the open segment
    /// covering the whole time line. Segments tile the time line, so later
    /// writes only create a segment to fill a gap left by corrupt metadata.
    ///
    /// Fails with [`Error::TimeOutOfRange`] for times outside
    /// `[min_time, max_time)`, which no segment can contain.
    pub fn segment_for_time(&self, time: DateTime<Utc>, key_version: i64) -> Result<Arc<Segment>> {
        check_pass_time(time)?;
        if let Some(found) = find_containing(&sync::read(&self.segments), time) {
            return Ok(found);
        }

        let mut segments = sync::write(&self.segments);
        if let Some(found) = find_containing(&segments, time) {
            return Ok(found);
        }
        let at = segments.partition_point(|s| s.start_time() <= time);
        let start = at
            .checked_sub(1)
            .map(|i| segments[i].end_time())
            .unwrap_or_else(min_time);
        let end = segments
            .get(at)
            .map(|s| s.start_time())
            .unwrap_or_else(max_time);
        if start >= end {
            return Err(Error::SegmentUnavailable(format!(
                "no segment can cover {time}: gap {start}..{end} is empty"
            )));
        }
        let segment = Arc::new(Segment::new(TimeRange::new(start, end), key_version));
        debug!(start = %start, end = %end, "segment created");
        segments.insert(at, Arc::clone(&segment));
        Ok(segment)
    }

    /// Split `segment` at its median pass time if it holds more than
    /// `max_passes` passes.
    ///
    /// Returns whether a split happened. The old segment is retired and,
    /// if it was ever stored, queued for deletion via
    /// [`SegmentDirectory::take_retired`].
    pub fn cleave_if_needed(&self, segment: &Arc<Segment>, max_passes: usize) -> bool {
        if segment.pass_count() <= max_passes {
            return false;
        }
        let Some(split_time) = segment.with_payload(|s| s.median_time()).flatten() else {
            return false;
        };
        if !segment.time_range().contains(split_time) || split_time == segment.start_time() {
            return false;
        }
        let Some(store) = segment.retire() else {
            return false;
        };

        let (before, after) = store.split_at_time(split_time);
        let key_version = segment.key_version();
        let first = Arc::new(Segment::from_store(
            TimeRange::new(segment.start_time(), split_time),
            key_version,
            before,
        ));
        let second = Arc::new(Segment::from_store(
            TimeRange::new(split_time, segment.end_time()),
            key_version,
            after,
        ));

        {
            let mut segments = sync::write(&self.segments);
            if let Some(i) = segments.iter().position(|s| Arc::ptr_eq(s, segment)) {
                segments.splice(i..=i, [first, second]);
            }
        }
        if segment.is_persisted() {
            sync::lock(&self.retired).push(Arc::clone(segment));
        }
        debug!(
            start = %segment.start_time(),
            split = %split_time,
            passes = segment.pass_count(),
            "segment cleaved"
        );
        true
    }

    /// Retired segments whose stored payloads must be deleted.
    pub fn take_retired(&self) -> Vec<Arc<Segment>> {
        std::mem::take(&mut *sync::lock(&self.retired))
    }

    /// Put back retired segments whose deletion did not go through.
    pub fn restore_retired(&self, segments: Vec<Arc<Segment>>) {
        sync::lock(&self.retired).extend(segments);
    }

    /// Unload clean payloads last used before `stamp`. Returns how many.
    pub fn unload_stale(&self, stamp: u64) -> usize {
        self.snapshot()
            .iter()
            .filter(|s| s.unload_if_stale(stamp))
            .count()
    }
}

fn find_containing(segments: &[Arc<Segment>], time: DateTime<Utc>) -> Option<Arc<Segment>> {
    let at = segments.partition_point(|s| s.start_time() <= time);
    let candidate = segments.get(at.checked_sub(1)?)?;
    candidate
        .time_range()
        .contains(time)
        .then(|| Arc::clone(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_pass::CellPass;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn first_write_creates_open_segment() {
        let directory = SegmentDirectory::new();
        let segment = directory.segment_for_time(day(3), 1).unwrap();
        assert_eq!(segment.time_range(), TimeRange::all());
        assert!(Arc::ptr_eq(&segment, &directory.segment_for_time(day(9), 1).unwrap()));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn cleave_splits_into_time_disjoint_halves() {
        let directory = SegmentDirectory::new();
        let segment = directory.segment_for_time(day(1), 1).unwrap();
        for d in 1..=8 {
            segment
                .add_pass((d % 3) as usize, 0, CellPass::at(1, day(d)))
                .expect("add");
        }

        assert!(!directory.cleave_if_needed(&segment, 8));
        assert!(directory.cleave_if_needed(&segment, 4));
        assert!(segment.is_retired());
        // Never stored, so there is nothing to delete.
        assert!(directory.take_retired().is_empty());

        let segments = directory.snapshot();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_time(), min_time());
        assert_eq!(segments[0].end_time(), segments[1].start_time());
        assert_eq!(segments[1].end_time(), max_time());
        assert_eq!(segments[0].pass_count() + segments[1].pass_count(), 8);
        assert!(segments.iter().all(|s| s.is_dirty()));

        let late = directory.segment_for_time(day(8), 1).unwrap();
        assert!(Arc::ptr_eq(&late, &segments[1]));
    }

    #[test]
    fn cleave_of_stored_segment_queues_deletion() {
        let directory = SegmentDirectory::new();
        let segment = directory.segment_for_time(day(1), 1).unwrap();
        for d in 1..=4 {
            segment.add_pass(0, 0, CellPass::at(1, day(d))).expect("add");
        }
        segment.mark_persisted();

        assert!(directory.cleave_if_needed(&segment, 2));
        let retired = directory.take_retired();
        assert_eq!(retired.len(), 1);
        assert!(Arc::ptr_eq(&retired[0], &segment));
        assert!(directory.take_retired().is_empty());
    }

    #[test]
    fn single_instant_segment_is_not_cleaved() {
        let directory = SegmentDirectory::new();
        let segment = directory.segment_for_time(day(1), 1).unwrap();
        for machine in 0..5 {
            segment.add_pass(0, 0, CellPass::at(machine, day(1))).expect("add");
        }
        assert!(!directory.cleave_if_needed(&segment, 2));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn descriptors_round_trip_and_reject_overlap() {
        let directory = SegmentDirectory::new();
        let segment = directory.segment_for_time(day(1), 1).unwrap();
        for d in 1..=4 {
            segment.add_pass(0, 0, CellPass::at(1, day(d))).expect("add");
        }
        directory.cleave_if_needed(&segment, 2);

        let descriptors = directory.descriptors();
        let restored = SegmentDirectory::from_descriptors(&descriptors).expect("restore");
        assert_eq!(restored.descriptors(), descriptors);

        let mut overlapping = descriptors.clone();
        overlapping[1].start_ticks = overlapping[0].start_ticks + 1;
        assert!(SegmentDirectory::from_descriptors(&overlapping).is_err());
    }

    #[test]
    fn times_outside_the_time_line_get_no_segment() {
        let directory = SegmentDirectory::new();
        let before = Utc.with_ymd_and_hms(0, 6, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            directory.segment_for_time(before, 1),
            Err(Error::TimeOutOfRange(_))
        ));
        assert!(matches!(
            directory.segment_for_time(max_time(), 1),
            Err(Error::TimeOutOfRange(_))
        ));
        assert!(directory.is_empty());

        let first = directory.segment_for_time(min_time(), 1).unwrap();
        assert_eq!(first.time_range(), TimeRange::all());
    }

    #[test]
    fn gap_is_filled_between_neighbours() {
        let left = Segment::new(TimeRange::new(min_time(), day(2)), 1).descriptor();
        let right = Segment::new(TimeRange::new(day(5), max_time()), 1).descriptor();
        let directory = SegmentDirectory::from_descriptors(&[right, left]).expect("restore");

        let filler = directory.segment_for_time(day(3), 1).unwrap();
        assert_eq!(filler.time_range(), TimeRange::new(day(2), day(5)));
        assert_eq!(directory.len(), 3);
    }
}
