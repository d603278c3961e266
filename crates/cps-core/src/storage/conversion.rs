//! Projection of mutable-tier streams into their immutable representation.

use cps_common::Result;

use super::keys::{NonSpatialKey, SpatialKey};
use crate::pass_store::PassArrayStore;

/// Derives immutable-tier bytes from uncompressed mutable-tier bytes.
pub trait MutabilityConverter: Send + Sync {
    /// Segment payloads.
    fn convert_segment(&self, key: &SpatialKey, raw: &[u8]) -> Result<Vec<u8>>;

    /// Leaf segment directories. Passed through unchanged by default.
    fn convert_directory(&self, _key: &SpatialKey, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    /// Non-spatial streams. Passed through unchanged by default.
    fn convert_stream(&self, _key: &NonSpatialKey, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }
}

/// Rewrites segments into the sparse immutable layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentConverter;

impl MutabilityConverter for SegmentConverter {
    fn convert_segment(&self, _key: &SpatialKey, raw: &[u8]) -> Result<Vec<u8>> {
        PassArrayStore::from_bytes(raw)?.to_immutable_bytes()
    }
}
