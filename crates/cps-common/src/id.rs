//! Dataset and subgrid identity types.
//!
//! A dataset (project) is identified by a UUID; every cache key carries it.
//! Leaf subgrids are identified by the global cell coordinate of their
//! bottom-left cell.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Dataset (project) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    /// Generate a new random dataset ID.
    pub fn new() -> Self {
        DatasetId(Uuid::new_v4())
    }

    /// Parse a dataset ID from its hyphenated UUID form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(DatasetId)
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DatasetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(DatasetId)
    }
}

impl From<Uuid> for DatasetId {
    fn from(id: Uuid) -> Self {
        DatasetId(id)
    }
}

/// Global cell coordinate of a leaf subgrid's bottom-left cell.
///
/// Both components are multiples of the leaf dimension (32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubGridOrigin {
    pub x: u32,
    pub y: u32,
}

impl SubGridOrigin {
    pub fn new(x: u32, y: u32) -> Self {
        SubGridOrigin { x, y }
    }
}

impl fmt::Display for SubGridOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_id_roundtrip() {
        let id = DatasetId::new();
        let parsed: DatasetId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_dataset_id_rejects_garbage() {
        assert!(DatasetId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(SubGridOrigin::new(64, 96).to_string(), "64-96");
    }
}
