//! NULL sentinels and fixed geometry for cell pass data.
//!
//! Every cell pass field has a reserved value meaning "not measured". The
//! values here are the single source of truth; nothing mutates them.

/// Cells along each side of a leaf subgrid (and of every node subgrid).
pub const SUBGRID_TREE_DIMENSION: u32 = 32;

/// `log2(SUBGRID_TREE_DIMENSION)`.
pub const SUBGRID_INDEX_BITS: u32 = 5;

/// Cells in one leaf subgrid.
pub const SUBGRID_TREE_CELLS_PER_SUBGRID: usize =
    (SUBGRID_TREE_DIMENSION * SUBGRID_TREE_DIMENSION) as usize;

/// Default number of tree levels (root to leaf inclusive).
pub const DEFAULT_TREE_LEVELS: u8 = 6;

/// Deepest tree whose cell coordinates still fit in a `u32` extent.
pub const MAX_TREE_LEVELS: u8 = 6;

/// Default ground size of one cell, in metres.
pub const DEFAULT_CELL_SIZE: f64 = 0.34;

/// NULL height. Compared bitwise, so a cleared pass equals itself.
pub const NULL_HEIGHT: f32 = -3.4e38;

/// NULL compaction meter value.
pub const NULL_CCV: i16 = -1;

/// NULL machine drive power.
pub const NULL_MDP: i16 = i16::MAX;

/// NULL resonance meter value.
pub const NULL_RMV: i16 = i16::MAX;

/// NULL vibration frequency.
pub const NULL_FREQUENCY: i16 = i16::MAX;

/// NULL vibration amplitude.
pub const NULL_AMPLITUDE: i16 = i16::MAX;

/// NULL material temperature.
pub const NULL_MATERIAL_TEMPERATURE: i16 = 4096;

/// NULL machine ID (dense machine table index).
pub const NULL_MACHINE_ID: i32 = -1;

/// NULL machine speed.
pub const NULL_MACHINE_SPEED: f32 = f32::MAX;

/// NULL radio latency.
pub const NULL_RADIO_LATENCY: u8 = u8::MAX;

/// NULL site model machine index.
pub const NULL_SITE_MODEL_MACHINE_INDEX: i16 = i16::MAX;

/// Wire discriminant of the NULL GPS mode.
pub const NULL_GPS_MODE: u8 = 15;

/// Default upper bound on passes held by one segment before it is cleaved.
pub const DEFAULT_MAX_PASSES_PER_SEGMENT: usize = 10_000;

/// Default ceiling on one decompressed stored stream.
pub const DEFAULT_MAX_STREAM_BYTES: u64 = 64 * 1024 * 1024;
