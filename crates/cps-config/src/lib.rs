//! Compaction pass store configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the store configuration file
//! - Config resolution (explicit path → env → XDG → defaults)
//! - Semantic validation of tree geometry and storage settings

pub mod resolve;
pub mod store;
pub mod validate;

pub use resolve::{resolve_config, ConfigPaths, ConfigSource, ResolvedConfig};
pub use store::{IterationConfig, SegmentConfig, StorageConfig, StoreConfig, TreeConfig};
pub use validate::{ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
