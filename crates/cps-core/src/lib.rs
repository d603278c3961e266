//! Compaction pass store core.
//!
//! This crate provides:
//! - The cell pass record and its per-leaf pass arrays
//! - Time-segmented leaf storage with snapshot iteration
//! - A sparse spatial index of subgrids
//! - Cache-backed persistence through a transactional storage proxy
//! - The per-dataset site model and the `cps` CLI

mod codec;
mod sync;

pub mod cell_pass;
pub mod cli;
pub mod clock;
pub mod exit_codes;
pub mod leaf_payload;
pub mod logging;
pub mod machines;
pub mod pass_store;
pub mod range;
pub mod segment;
pub mod site_model;
pub mod spatial;
pub mod storage;
pub mod telemetry;

pub use cell_pass::{CellPass, GpsMode, PassType, CELL_PASS_WIRE_SIZE};
pub use clock::{Clock, FixedClock, SystemClock};
pub use leaf_payload::{FloatGrid, LeafPayload, LeafPayloadKind};
pub use machines::{Machine, MachineTable};
pub use pass_store::{IntegrationCounts, PassArrayStore};
pub use range::{ElevationRange, TimeRange};
pub use segment::{
    IterationDirection, IteratorState, Segment, SegmentDescriptor, SegmentDirectory,
    SegmentIterator, SegmentLoader,
};
pub use site_model::{FlushSummary, SiteModel, SiteModelStats};
pub use spatial::{ExistenceMap, Leaf, SpatialIndex};
pub use storage::{
    CacheKey, CacheKind, CommitStats, FileCache, KeyValueCache, MemoryCache, Mutability,
    NonSpatialKey, ProxyCaches, ProxySegmentLoader, SpatialKey, StorageProxy,
};
