//! Time-bounded segments of a leaf subgrid's pass history.
//!
//! A leaf's history is split into segments covering disjoint half-open time
//! ranges. The [`Segment`] is the durable handle: its range, coarse
//! elevation range and pass count stay in memory, while the
//! [`PassArrayStore`] payload may be unloaded and reloaded through a
//! [`SegmentLoader`].
//!
//! Locking: descriptor state and payload sit behind separate locks. The
//! payload lock is always taken first when both are needed.

mod directory;
mod iterator;

pub use directory::SegmentDirectory;
pub use iterator::{IterationDirection, IteratorState, SegmentIterator};

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use cps_common::{datetime_from_ticks, ticks_from_datetime, Error, Result, SubGridOrigin};
use serde::{Deserialize, Serialize};

use crate::cell_pass::CellPass;
use crate::pass_store::{IntegrationCounts, PassArrayStore};
use crate::range::{ElevationRange, TimeRange};
use crate::sync;

/// Loads a segment's payload from wherever it was persisted.
pub trait SegmentLoader {
    fn load(&self, origin: SubGridOrigin, segment: &Segment) -> Result<PassArrayStore>;
}

/// Persisted form of a segment's directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub start_ticks: i64,
    pub end_ticks: i64,
    pub key_version: i64,
    pub pass_count: usize,
    #[serde(default)]
    pub elevation_range: Option<ElevationRange>,
}

#[derive(Debug)]
struct SegmentState {
    elevation_range: Option<ElevationRange>,
    pass_count: usize,
    is_dirty: bool,
    cache_stamp: u64,
    persisted: bool,
    retired: bool,
}

#[derive(Debug)]
enum Payload {
    Unloaded,
    Resident(PassArrayStore),
}

/// One time-bounded slice of a leaf's pass history.
#[derive(Debug)]
pub struct Segment {
    range: TimeRange,
    key_version: i64,
    state: RwLock<SegmentState>,
    payload: RwLock<Payload>,
}

impl Segment {
    /// A new, empty, resident segment that has never been stored.
    pub fn new(range: TimeRange, key_version: i64) -> Self {
        Self::from_store(range, key_version, PassArrayStore::new())
    }

    /// A new resident segment owning `store`, marked dirty when non-empty.
    pub(crate) fn from_store(range: TimeRange, key_version: i64, store: PassArrayStore) -> Self {
        let state = SegmentState {
            elevation_range: store.elevation_range(),
            pass_count: store.total_pass_count(),
            is_dirty: !store.is_empty(),
            cache_stamp: 0,
            persisted: false,
            retired: false,
        };
        Self {
            range,
            key_version,
            state: RwLock::new(state),
            payload: RwLock::new(Payload::Resident(store)),
        }
    }

    /// Rebuild an unloaded segment from its persisted descriptor.
    pub fn from_descriptor(descriptor: &SegmentDescriptor) -> Result<Self> {
        let start = datetime_from_ticks(descriptor.start_ticks).ok_or_else(|| {
            Error::decoding(format!("segment start ticks {}", descriptor.start_ticks))
        })?;
        let end = datetime_from_ticks(descriptor.end_ticks).ok_or_else(|| {
            Error::decoding(format!("segment end ticks {}", descriptor.end_ticks))
        })?;
        if start >= end {
            return Err(Error::decoding(format!(
                "segment range {}..{} is empty",
                descriptor.start_ticks, descriptor.end_ticks
            )));
        }
        Ok(Self {
            range: TimeRange::new(start, end),
            key_version: descriptor.key_version,
            state: RwLock::new(SegmentState {
                elevation_range: descriptor.elevation_range,
                pass_count: descriptor.pass_count,
                is_dirty: false,
                cache_stamp: 0,
                persisted: true,
                retired: false,
            }),
            payload: RwLock::new(Payload::Unloaded),
        })
    }

    pub fn descriptor(&self) -> SegmentDescriptor {
        let state = sync::read(&self.state);
        SegmentDescriptor {
            start_ticks: ticks_from_datetime(self.range.start),
            end_ticks: ticks_from_datetime(self.range.end),
            key_version: self.key_version,
            pass_count: state.pass_count,
            elevation_range: state.elevation_range,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        self.range
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.range.start
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.range.end
    }

    pub fn key_version(&self) -> i64 {
        self.key_version
    }

    pub fn elevation_range(&self) -> Option<ElevationRange> {
        sync::read(&self.state).elevation_range
    }

    pub fn pass_count(&self) -> usize {
        sync::read(&self.state).pass_count
    }

    pub fn is_dirty(&self) -> bool {
        sync::read(&self.state).is_dirty
    }

    pub fn cache_stamp(&self) -> u64 {
        sync::read(&self.state).cache_stamp
    }

    /// Whether a payload for this segment exists in storage.
    pub fn is_persisted(&self) -> bool {
        sync::read(&self.state).persisted
    }

    /// Whether the segment has been replaced by a cleave.
    pub fn is_retired(&self) -> bool {
        sync::read(&self.state).retired
    }

    pub fn is_resident(&self) -> bool {
        matches!(*sync::read(&self.payload), Payload::Resident(_))
    }

    /// Record that the segment was used at logical time `stamp`.
    pub fn touch(&self, stamp: u64) {
        let mut state = sync::write(&self.state);
        state.cache_stamp = state.cache_stamp.max(stamp);
    }

    /// Run `f` against the resident payload. `None` when unloaded.
    pub fn with_payload<T>(&self, f: impl FnOnce(&PassArrayStore) -> T) -> Option<T> {
        match &*sync::read(&self.payload) {
            Payload::Resident(store) => Some(f(store)),
            Payload::Unloaded => None,
        }
    }

    /// Make the payload resident, loading it with `loader` if needed.
    ///
    /// Fails with [`Error::SegmentUnavailable`] once the segment is retired;
    /// its passes live in the segments that replaced it.
    pub fn ensure_resident(&self, origin: SubGridOrigin, loader: &dyn SegmentLoader) -> Result<()> {
        if self.is_resident() {
            return Ok(());
        }
        self.check_not_retired()?;
        let store = loader.load(origin, self)?;
        let mut payload = sync::write(&self.payload);
        self.check_not_retired()?;
        // A concurrent loader may have won; keep its copy.
        if matches!(*payload, Payload::Unloaded) {
            tracing::debug!(
                subgrid = %origin,
                start = %self.range.start,
                passes = store.total_pass_count(),
                "segment loaded"
            );
            *payload = Payload::Resident(store);
        }
        Ok(())
    }

    /// Add one pass. Fails if the payload is not resident or the segment
    /// has been retired; the caller re-selects a segment and retries.
    pub fn add_pass(&self, x: usize, y: usize, pass: CellPass) -> Result<()> {
        self.mutate(|store| {
            store.add_pass(x, y, pass);
            (1, pass.has_height().then(|| ElevationRange::point(pass.height)))
        })
    }

    /// Integrate a pass history into one cell. See [`PassArrayStore::integrate`].
    pub fn integrate(
        &self,
        x: usize,
        y: usize,
        passes: &[CellPass],
        replace_elevation: bool,
        elevation_filter: Option<ElevationRange>,
    ) -> Result<IntegrationCounts> {
        let mut counts = IntegrationCounts::default();
        self.mutate(|store| {
            let (integrated, heights) =
                store.integrate_tracked(x, y, passes, replace_elevation, elevation_filter);
            counts = integrated;
            (counts.added, heights)
        })?;
        Ok(counts)
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut PassArrayStore) -> (usize, Option<ElevationRange>),
    ) -> Result<()> {
        let mut payload = sync::write(&self.payload);
        self.check_not_retired()?;
        let Payload::Resident(store) = &mut *payload else {
            return Err(Error::SegmentUnavailable(format!(
                "segment starting {} is not resident",
                self.range.start
            )));
        };
        let (added, heights) = f(store);

        let mut state = sync::write(&self.state);
        state.pass_count += added;
        state.elevation_range = ElevationRange::union(state.elevation_range, heights);
        state.is_dirty = true;
        Ok(())
    }

    fn check_not_retired(&self) -> Result<()> {
        if self.is_retired() {
            return Err(Error::SegmentUnavailable(format!(
                "segment starting {} was retired",
                self.range.start
            )));
        }
        Ok(())
    }

    /// Encode the resident payload for storage. `None` when unloaded.
    pub fn encode(&self) -> Result<Option<Vec<u8>>> {
        match &*sync::read(&self.payload) {
            Payload::Resident(store) => store.to_bytes().map(Some),
            Payload::Unloaded => Ok(None),
        }
    }

    /// Record a successful write of the payload.
    pub fn mark_persisted(&self) {
        let mut state = sync::write(&self.state);
        state.is_dirty = false;
        state.persisted = true;
    }

    /// Drop the payload if it is clean and was last used before `stamp`.
    pub fn unload_if_stale(&self, stamp: u64) -> bool {
        let mut payload = sync::write(&self.payload);
        let state = sync::read(&self.state);
        if state.is_dirty || !state.persisted || state.cache_stamp >= stamp {
            return false;
        }
        if matches!(*payload, Payload::Resident(_)) {
            *payload = Payload::Unloaded;
            return true;
        }
        false
    }

    /// Take the payload out and mark the segment retired.
    ///
    /// Returns `None` (and leaves the segment untouched) when the payload is
    /// not resident or the segment is already retired.
    pub(crate) fn retire(&self) -> Option<PassArrayStore> {
        let mut payload = sync::write(&self.payload);
        let mut state = sync::write(&self.state);
        if state.retired {
            return None;
        }
        match std::mem::replace(&mut *payload, Payload::Unloaded) {
            Payload::Resident(store) => {
                state.retired = true;
                state.is_dirty = false;
                Some(store)
            }
            Payload::Unloaded => None,
        }
    }
}
