//! Compaction pass store common types, IDs, and errors.
//!
//! This crate provides foundational types shared across cps-core modules:
//! - Dataset and subgrid identity types
//! - NULL sentinel constants for cell pass fields
//! - Tick/time conversion for the binary wire formats
//! - Wire format versioning
//! - Common error types

pub mod consts;
pub mod error;
pub mod id;
pub mod schema;
pub mod ticks;

pub use error::{Error, Result};
pub use id::{DatasetId, SubGridOrigin};
pub use schema::{SCHEMA_VERSION, SEGMENT_FORMAT_VERSION};
pub use ticks::{
    check_pass_time, checked_ticks_from_datetime, datetime_from_ticks, max_time, min_time,
    ticks_from_datetime, MAX_TICKS,
};
