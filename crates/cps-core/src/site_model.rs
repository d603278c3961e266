//! A dataset's pass store: the spatial index, its segments and the machine
//! table, with flush to and load from a [`StorageProxy`].
//!
//! Writers and readers share a `SiteModel` by reference. Segment payloads
//! are loaded lazily through the proxy given to each call. `flush` must not
//! race with writers: a pass added between encoding and commit would be
//! marked clean without being stored.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use cps_common::consts::SUBGRID_TREE_DIMENSION;
use cps_common::{check_pass_time, max_time, min_time, DatasetId, Error, Result, SubGridOrigin};
use cps_config::StoreConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cell_pass::CellPass;
use crate::clock::{Clock, SystemClock};
use crate::leaf_payload::FloatGrid;
use crate::machines::{MachineTable, MACHINES_STREAM};
use crate::pass_store::{IntegrationCounts, DIM};
use crate::range::TimeRange;
use crate::segment::{
    IterationDirection, Segment, SegmentDescriptor, SegmentDirectory, SegmentIterator,
};
use crate::spatial::{ExistenceMap, Leaf, SpatialIndex};
use crate::storage::{CommitStats, NonSpatialKey, ProxySegmentLoader, SpatialKey, StorageProxy};
use crate::sync;

/// Name of the non-spatial stream holding the existence map.
pub const EXISTENCE_STREAM: &str = "subgrid-existence";

/// Attempts at writing into a segment before giving up. A write only
/// retries when the segment it picked was cleaved or unloaded under it.
const MAX_WRITE_ATTEMPTS: usize = 64;

/// What a flush wrote.
#[derive(Debug, Clone, Serialize)]
pub struct FlushSummary {
    pub segments_written: usize,
    pub segments_deleted: usize,
    pub directories_written: usize,
    pub machines_written: bool,
    pub existence_written: bool,
    pub commit: CommitStats,
    pub flushed_at: DateTime<Utc>,
}

/// Point-in-time counts over the whole model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteModelStats {
    pub leaves: usize,
    pub segments: usize,
    pub resident_segments: usize,
    pub dirty_segments: usize,
    pub passes: usize,
    pub machines: usize,
}

pub struct SiteModel {
    dataset_id: DatasetId,
    config: StoreConfig,
    index: SpatialIndex,
    machines: RwLock<MachineTable>,
    machines_dirty: AtomicBool,
    /// The existence map as last committed or loaded.
    existence_flushed: RwLock<Option<ExistenceMap>>,
    stamp: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SiteModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteModel")
            .field("dataset_id", &self.dataset_id)
            .field("leaves", &self.index.leaf_count())
            .field("stamp", &self.stamp.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SiteModel {
    /// An empty model for `dataset_id`.
    pub fn new(dataset_id: DatasetId, config: StoreConfig) -> Result<Self> {
        let index = SpatialIndex::new(config.tree.levels, config.tree.cell_size)?;
        Ok(Self {
            dataset_id,
            config,
            index,
            machines: RwLock::new(MachineTable::new()),
            machines_dirty: AtomicBool::new(false),
            existence_flushed: RwLock::new(None),
            stamp: AtomicU64::new(0),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rebuild a model from storage: the existence map, every leaf's
    /// segment directory and the machine table. Payloads stay unloaded.
    pub fn load(dataset_id: DatasetId, storage: &StorageProxy, config: StoreConfig) -> Result<Self> {
        let model = Self::new(dataset_id, config)?;

        let existence_key = NonSpatialKey::new(dataset_id, EXISTENCE_STREAM)?;
        let existence = match storage.get(&existence_key) {
            Ok(bytes) => ExistenceMap::from_json(&bytes)?,
            Err(e) if e.is_not_found() => {
                debug!(dataset = %dataset_id, "no existence map; starting empty");
                ExistenceMap::new()
            }
            Err(e) => return Err(e),
        };

        for origin in existence.iter() {
            let key = model.directory_key(origin);
            let directory = match storage.get(&key) {
                Ok(bytes) => {
                    let descriptors: Vec<SegmentDescriptor> = serde_json::from_slice(&bytes)?;
                    SegmentDirectory::from_descriptors(&descriptors)?
                }
                Err(e) if e.is_not_found() => {
                    warn!(subgrid = %origin, "leaf listed without a directory");
                    SegmentDirectory::new()
                }
                Err(e) => return Err(e),
            };
            model
                .index
                .install_leaf(Leaf::with_directory(origin, directory))?;
        }
        *sync::write(&model.existence_flushed) = Some(existence);

        let machines_key = NonSpatialKey::new(dataset_id, MACHINES_STREAM)?;
        match storage.get(&machines_key) {
            Ok(bytes) => *sync::write(&model.machines) = MachineTable::from_json(&bytes)?,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(
            dataset = %dataset_id,
            leaves = model.index.leaf_count(),
            machines = model.machine_count(),
            "site model loaded"
        );
        Ok(model)
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Id of the machine called `name`, registering it if new.
    pub fn register_machine(&self, name: &str, is_john_doe: bool) -> Result<i32> {
        let mut machines = sync::write(&self.machines);
        let before = machines.len();
        let id = machines.register(name, is_john_doe)?;
        if machines.len() != before {
            self.machines_dirty.store(true, Ordering::Release);
            debug!(machine = name, id, "machine registered");
        }
        Ok(id)
    }

    pub fn machines(&self) -> MachineTable {
        sync::read(&self.machines).clone()
    }

    pub fn machine_count(&self) -> usize {
        sync::read(&self.machines).len()
    }

    /// The latest cache stamp handed out.
    pub fn current_stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    fn next_stamp(&self) -> u64 {
        self.stamp.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn directory_key(&self, origin: SubGridOrigin) -> SpatialKey {
        SpatialKey::directory(self.dataset_id, origin)
    }

    fn segment_key(&self, origin: SubGridOrigin, segment: &Segment) -> SpatialKey {
        SpatialKey::segment(
            segment.key_version(),
            self.dataset_id,
            origin,
            segment.time_range(),
        )
    }

    fn leaf_for_write(&self, x: u32, y: u32) -> Result<Arc<Leaf>> {
        self.index
            .construct_path_to_cell(x, y, true)?
            .ok_or(Error::LeafNotFound { x, y })
    }

    fn observe_machine(&self, pass: &CellPass) {
        if sync::write(&self.machines).observe(pass.machine_id, pass.time) {
            self.machines_dirty.store(true, Ordering::Release);
        }
    }

    /// Run `write` against the segment of `leaf` covering `time`,
    /// re-selecting it if a concurrent cleave or unload got there first.
    fn write_segment<T>(
        &self,
        storage: &StorageProxy,
        leaf: &Leaf,
        time: DateTime<Utc>,
        mut write: impl FnMut(&Segment) -> Result<T>,
    ) -> Result<(Arc<Segment>, T)> {
        let loader = ProxySegmentLoader::new(storage, self.dataset_id);
        let key_version = self.config.storage.spatial_key_version;
        let mut last = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let segment = leaf.directory().segment_for_time(time, key_version)?;
            let attempt = segment
                .ensure_resident(leaf.origin(), &loader)
                .and_then(|()| write(&segment));
            match attempt {
                Ok(value) => {
                    segment.touch(self.next_stamp());
                    return Ok((segment, value));
                }
                Err(Error::SegmentUnavailable(reason)) => {
                    debug!(subgrid = %leaf.origin(), reason = %reason, "segment moved; retrying write");
                    last = Some(reason);
                    // The cleaving thread still has to publish the halves.
                    std::thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::SegmentUnavailable(format!(
            "gave up after {MAX_WRITE_ATTEMPTS} attempts: {}",
            last.unwrap_or_default()
        )))
    }

    fn cleave(&self, leaf: &Leaf, segment: &Arc<Segment>) {
        let max = self.config.segments.max_passes_per_segment;
        if leaf.directory().cleave_if_needed(segment, max) {
            debug!(
                subgrid = %leaf.origin(),
                segments = leaf.directory().len(),
                "leaf segments cleaved"
            );
        }
    }

    /// Add one pass to cell `(x, y)`.
    pub fn add_pass(&self, storage: &StorageProxy, x: u32, y: u32, pass: CellPass) -> Result<()> {
        check_pass_time(pass.time)?;
        let leaf = self.leaf_for_write(x, y)?;
        let (lx, ly) = leaf.local(x, y);
        let (segment, ()) =
            self.write_segment(storage, &leaf, pass.time, |s| s.add_pass(lx, ly, pass))?;
        self.observe_machine(&pass);
        self.cleave(&leaf, &segment);
        Ok(())
    }

    /// Merge a pass history into cell `(x, y)`. Passes matching a stored
    /// pass by machine and time replace it; the rest are added.
    pub fn integrate_cell_passes(
        &self,
        storage: &StorageProxy,
        x: u32,
        y: u32,
        passes: &[CellPass],
    ) -> Result<IntegrationCounts> {
        // Nothing is written unless every pass can be placed.
        for pass in passes {
            check_pass_time(pass.time)?;
        }
        let leaf = self.leaf_for_write(x, y)?;
        let (lx, ly) = leaf.local(x, y);
        let mut sorted = passes.to_vec();
        sorted.sort_by_key(|p| p.time);

        let mut totals = IntegrationCounts::default();
        let mut rest = sorted.as_slice();
        while let Some(first) = rest.first() {
            let (segment, (taken, counts)) =
                self.write_segment(storage, &leaf, first.time, |s| {
                    let range = s.time_range();
                    let taken = rest.partition_point(|p| range.contains(p.time));
                    s.integrate(lx, ly, &rest[..taken], false, None)
                        .map(|counts| (taken, counts))
                })?;
            totals.added += counts.added;
            totals.modified += counts.modified;
            rest = &rest[taken..];
            self.cleave(&leaf, &segment);
        }
        for pass in &sorted {
            self.observe_machine(pass);
        }
        Ok(totals)
    }

    /// Stage every change since the last flush and commit it.
    ///
    /// Writes dirty segments, deletes the stored payloads of cleaved
    /// segments, rewrites the directories of touched leaves, then the
    /// existence map and (if changed) the machine table. On failure nothing
    /// is marked clean and the staged state is cleared, so the flush can be
    /// repeated.
    pub fn flush(&self, storage: &mut StorageProxy) -> Result<FlushSummary> {
        let mut written = Vec::new();
        let mut retired = Vec::new();
        let mut existence = None;
        let staged = self.stage_changes(storage, &mut written, &mut retired, &mut existence);

        let result = staged.and_then(|summary| {
            let commit = storage.commit()?;
            Ok(FlushSummary { commit, ..summary })
        });
        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                storage.clear();
                for (leaf, segments) in retired {
                    leaf.directory().restore_retired(segments);
                }
                warn!(dataset = %self.dataset_id, error = %e, "flush failed");
                return Err(e);
            }
        };

        for segment in &written {
            segment.mark_persisted();
        }
        if summary.machines_written {
            self.machines_dirty.store(false, Ordering::Release);
        }
        if let Some(existence) = existence {
            *sync::write(&self.existence_flushed) = Some(existence);
        }
        info!(
            dataset = %self.dataset_id,
            segments_written = summary.segments_written,
            segments_deleted = summary.segments_deleted,
            directories = summary.directories_written,
            bytes = summary.commit.num_bytes_written,
            "site model flushed"
        );
        Ok(summary)
    }

    fn stage_changes(
        &self,
        storage: &mut StorageProxy,
        written: &mut Vec<Arc<Segment>>,
        retired: &mut Vec<(Arc<Leaf>, Vec<Arc<Segment>>)>,
        staged_existence: &mut Option<ExistenceMap>,
    ) -> Result<FlushSummary> {
        let mut summary = FlushSummary {
            segments_written: 0,
            segments_deleted: 0,
            directories_written: 0,
            machines_written: false,
            existence_written: false,
            commit: CommitStats::default(),
            flushed_at: self.clock.now(),
        };

        for leaf in self.index.leaves() {
            let origin = leaf.origin();
            let gone = leaf.directory().take_retired();
            let mut touched = !gone.is_empty();
            for segment in &gone {
                storage.remove(&self.segment_key(origin, segment));
                summary.segments_deleted += 1;
            }
            retired.push((Arc::clone(&leaf), gone));

            for segment in leaf.directory().snapshot() {
                if !segment.is_dirty() {
                    continue;
                }
                let Some(bytes) = segment.encode()? else {
                    continue;
                };
                storage.put(&self.segment_key(origin, &segment), &bytes)?;
                written.push(segment);
                summary.segments_written += 1;
                touched = true;
            }

            if touched {
                let descriptors = leaf.directory().descriptors();
                storage.put(&self.directory_key(origin), &serde_json::to_vec(&descriptors)?)?;
                summary.directories_written += 1;
            }
        }

        let existence = self.index.existence_map();
        if sync::read(&self.existence_flushed).as_ref() != Some(&existence) {
            storage.put(
                &NonSpatialKey::new(self.dataset_id, EXISTENCE_STREAM)?,
                &existence.to_json()?,
            )?;
            summary.existence_written = true;
            *staged_existence = Some(existence);
        }

        if self.machines_dirty.load(Ordering::Acquire) {
            let bytes = sync::read(&self.machines).to_json()?;
            storage.put(&NonSpatialKey::new(self.dataset_id, MACHINES_STREAM)?, &bytes)?;
            summary.machines_written = true;
        }
        Ok(summary)
    }

    fn reader<'a>(
        &self,
        leaf: &'a Leaf,
        loader: &'a ProxySegmentLoader<'a>,
        direction: IterationDirection,
        range: TimeRange,
    ) -> SegmentIterator<'a> {
        let mut iterator = SegmentIterator::new(leaf.directory(), direction)
            .with_loader(loader, leaf.origin())
            .skip_unreadable_segments(self.config.iteration.skip_unreadable_segments);
        iterator.set_time_range(range.start, range.end);
        iterator.mark_cache_stamp(self.next_stamp());
        iterator
    }

    /// Every pass of cell `(x, y)` with a time in `range`, oldest first.
    pub fn cell_passes(
        &self,
        storage: &StorageProxy,
        x: u32,
        y: u32,
        range: TimeRange,
    ) -> Result<Vec<CellPass>> {
        let Some(leaf) = self.index.locate_leaf(x, y)? else {
            return Ok(Vec::new());
        };
        let (lx, ly) = leaf.local(x, y);
        let loader = ProxySegmentLoader::new(storage, self.dataset_id);
        let mut iterator = self.reader(&leaf, &loader, IterationDirection::Forward, range);

        let mut passes = Vec::new();
        while let Some(segment) = iterator.move_next()? {
            let read = segment.with_payload(|store| {
                passes.extend(
                    store
                        .cell_passes(lx, ly)
                        .iter()
                        .filter(|p| range.contains(p.time))
                        .copied(),
                );
            });
            if read.is_none() {
                iterator.rescan_current();
            }
        }
        Ok(passes)
    }

    /// The pass describing cell `(x, y)` as of `time`: the last one at or
    /// before it.
    pub fn latest_pass_at(
        &self,
        storage: &StorageProxy,
        x: u32,
        y: u32,
        time: DateTime<Utc>,
    ) -> Result<Option<CellPass>> {
        let Some(leaf) = self.index.locate_leaf(x, y)? else {
            return Ok(None);
        };
        let (lx, ly) = leaf.local(x, y);
        let loader = ProxySegmentLoader::new(storage, self.dataset_id);
        let mut iterator =
            self.reader(&leaf, &loader, IterationDirection::Backward, up_to(time));

        while let Some(segment) = iterator.move_next()? {
            let found = segment.with_payload(|store| match store.locate_time(lx, ly, time) {
                (_, Some(i)) => store.extract_cell_pass(lx, ly, i),
                (_, None) => None,
            });
            match found {
                Some(Some(pass)) => return Ok(Some(pass)),
                Some(None) => {}
                None => iterator.rescan_current(),
            }
        }
        Ok(None)
    }

    /// Latest known height of every cell of the leaf containing `(x, y)`
    /// as of `time`. `None` when no leaf exists there.
    pub fn heights_at(
        &self,
        storage: &StorageProxy,
        x: u32,
        y: u32,
        time: DateTime<Utc>,
    ) -> Result<Option<(SubGridOrigin, FloatGrid)>> {
        let Some(leaf) = self.index.locate_leaf(x, y)? else {
            return Ok(None);
        };
        let loader = ProxySegmentLoader::new(storage, self.dataset_id);
        let mut iterator =
            self.reader(&leaf, &loader, IterationDirection::Backward, up_to(time));

        let mut grid = FloatGrid::new();
        let cells = (SUBGRID_TREE_DIMENSION * SUBGRID_TREE_DIMENSION) as usize;
        while grid.populated() < cells {
            let Some(segment) = iterator.move_next()? else {
                break;
            };
            let read = segment.with_payload(|store| {
                for cx in 0..DIM {
                    for cy in 0..DIM {
                        if !grid.is_null(cx, cy) {
                            continue;
                        }
                        let height = store
                            .cell_passes(cx, cy)
                            .iter()
                            .rev()
                            .find(|p| p.time <= time && p.has_height())
                            .map(|p| p.height);
                        if let Some(height) = height {
                            grid.set(cx, cy, height);
                        }
                    }
                }
            });
            if read.is_none() {
                iterator.rescan_current();
            }
        }
        Ok(Some((leaf.origin(), grid)))
    }

    /// Drop clean payloads not used within the last `retain` stamps;
    /// `0` unloads every clean payload. Returns how many were unloaded.
    pub fn unload_stale(&self, retain: u64) -> usize {
        let threshold = (self.current_stamp() + 1).saturating_sub(retain);
        let unloaded: usize = self
            .index
            .leaves()
            .iter()
            .map(|leaf| leaf.directory().unload_stale(threshold))
            .sum();
        if unloaded > 0 {
            debug!(unloaded, threshold, "stale segments unloaded");
        }
        unloaded
    }

    pub fn stats(&self) -> SiteModelStats {
        let mut stats = SiteModelStats {
            machines: self.machine_count(),
            ..SiteModelStats::default()
        };
        for leaf in self.index.leaves() {
            stats.leaves += 1;
            for segment in leaf.directory().snapshot() {
                stats.segments += 1;
                stats.passes += segment.pass_count();
                stats.resident_segments += usize::from(segment.is_resident());
                stats.dirty_segments += usize::from(segment.is_dirty());
            }
        }
        stats
    }
}

/// `[min, time]` as a half-open range.
fn up_to(time: DateTime<Utc>) -> TimeRange {
    let end = time
        .checked_add_signed(Duration::nanoseconds(100))
        .unwrap_or_else(max_time);
    TimeRange::new(min_time(), end)
}
