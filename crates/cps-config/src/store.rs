//! Store configuration types.
//!
//! Every section is optional in the JSON file; missing sections take the
//! defaults below.

use cps_common::consts::{
    DEFAULT_CELL_SIZE, DEFAULT_MAX_PASSES_PER_SEGMENT, DEFAULT_MAX_STREAM_BYTES,
    DEFAULT_TREE_LEVELS, MAX_TREE_LEVELS, SUBGRID_TREE_DIMENSION,
};
use cps_common::SEGMENT_FORMAT_VERSION;
use serde::{Deserialize, Serialize};

use crate::validate::{ValidationError, ValidationResult};
use crate::CONFIG_SCHEMA_VERSION;

/// Complete store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tree: TreeConfig,

    #[serde(default)]
    pub segments: SegmentConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub iteration: IterationConfig,
}

fn default_schema_version() -> String {
    CONFIG_SCHEMA_VERSION.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            description: None,
            tree: TreeConfig::default(),
            segments: SegmentConfig::default(),
            storage: StorageConfig::default(),
            iteration: IterationConfig::default(),
        }
    }
}

/// Spatial index geometry. Fixed for the life of a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Number of levels, root to leaf inclusive.
    pub levels: u8,

    /// Ground size of one cell in metres.
    pub cell_size: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_TREE_LEVELS,
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

impl TreeConfig {
    /// Number of cells along one axis of the whole tree.
    pub fn cells_per_axis(&self) -> u64 {
        u64::from(SUBGRID_TREE_DIMENSION).pow(u32::from(self.levels))
    }
}

/// Segment sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// A segment holding more passes than this is cleaved in two.
    pub max_passes_per_segment: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_passes_per_segment: DEFAULT_MAX_PASSES_PER_SEGMENT,
        }
    }
}

/// Storage proxy behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Version stamped into spatial keys of newly written segments.
    #[serde(default = "default_key_version")]
    pub spatial_key_version: i64,

    /// Deflate level (0-9) for stored streams.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Whether mutable writes are projected into an immutable tier.
    #[serde(default = "default_true")]
    pub immutable_tier: bool,

    /// Whether commit fans cache kinds out across worker threads.
    #[serde(default = "default_true")]
    pub parallel_commit: bool,

    /// Largest decompressed stream a read will accept, in bytes.
    #[serde(default = "default_max_stream_bytes")]
    pub max_stream_bytes: u64,
}

fn default_key_version() -> i64 {
    SEGMENT_FORMAT_VERSION
}

fn default_compression_level() -> u32 {
    6
}

fn default_max_stream_bytes() -> u64 {
    DEFAULT_MAX_STREAM_BYTES
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            spatial_key_version: default_key_version(),
            compression_level: default_compression_level(),
            immutable_tier: true,
            parallel_commit: true,
            max_stream_bytes: default_max_stream_bytes(),
        }
    }
}

/// Segment iteration behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationConfig {
    /// Skip (and log) segments whose storage read fails during broad scans
    /// instead of failing the whole query.
    pub skip_unreadable_segments: bool,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            skip_unreadable_segments: true,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Semantic validation. Errors make the config unusable; warnings are
    /// reported alongside.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !cps_common::schema::is_compatible(&self.schema_version) {
            result.error(format!(
                "unsupported schema_version {} (expected {})",
                self.schema_version, CONFIG_SCHEMA_VERSION
            ));
        }

        if self.tree.levels < 2 || self.tree.levels > MAX_TREE_LEVELS {
            result.error(format!(
                "tree.levels must be between 2 and {}, got {}",
                MAX_TREE_LEVELS, self.tree.levels
            ));
        }

        if !self.tree.cell_size.is_finite() || self.tree.cell_size <= 0.0 {
            result.error(format!(
                "tree.cell_size must be a positive finite number, got {}",
                self.tree.cell_size
            ));
        } else if self.tree.cell_size > 100.0 {
            result.warn(format!(
                "tree.cell_size of {}m is unusually coarse",
                self.tree.cell_size
            ));
        }

        if self.segments.max_passes_per_segment < 2 {
            result.error("segments.max_passes_per_segment must be at least 2".to_string());
        }

        if self.storage.compression_level > 9 {
            result.error(format!(
                "storage.compression_level must be 0-9, got {}",
                self.storage.compression_level
            ));
        }

        if self.storage.max_stream_bytes == 0 {
            result.error("storage.max_stream_bytes must be positive".to_string());
        }

        if self.storage.spatial_key_version < 1 {
            result.error("storage.spatial_key_version must be positive".to_string());
        }

        result
    }

    /// Validate and convert a failing result into an error.
    pub fn validated(self) -> Result<Self, ValidationError> {
        let result = self.validate();
        for warning in &result.warnings {
            tracing::warn!(warning = %warning, "store configuration warning");
        }
        if result.is_valid() {
            Ok(self)
        } else {
            Err(ValidationError::Invalid(result.errors))
        }
    }
}
