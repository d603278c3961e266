//! The set of leaf subgrids present in a dataset.

use std::collections::BTreeSet;

use cps_common::{Error, Result, SubGridOrigin, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};

/// Leaf origins known to exist, persisted so a dataset can be reopened
/// without enumerating storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceMap {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    origins: BTreeSet<SubGridOrigin>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl ExistenceMap {
    pub fn new() -> Self {
        Self {
            schema_version: default_schema_version(),
            origins: BTreeSet::new(),
        }
    }

    /// Returns true if `origin` was not already present.
    pub fn insert(&mut self, origin: SubGridOrigin) -> bool {
        self.origins.insert(origin)
    }

    pub fn contains(&self, origin: SubGridOrigin) -> bool {
        self.origins.contains(&origin)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SubGridOrigin> + '_ {
        self.origins.iter().copied()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let map: ExistenceMap = serde_json::from_slice(bytes)?;
        if !cps_common::schema::is_compatible(&map.schema_version) {
            return Err(Error::decoding(format!(
                "existence map schema {} is not supported",
                map.schema_version
            )));
        }
        Ok(map)
    }
}

impl FromIterator<SubGridOrigin> for ExistenceMap {
    fn from_iter<I: IntoIterator<Item = SubGridOrigin>>(iter: I) -> Self {
        let mut map = ExistenceMap::new();
        map.origins.extend(iter);
        map
    }
}
