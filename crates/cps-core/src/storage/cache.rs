//! The byte-oriented key-value cache contract and an in-memory adapter.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use cps_common::Result;

use crate::sync;

/// A byte-stream cache addressed by string keys.
///
/// Implementations take `&self` and synchronise internally; a proxy may
/// commit to several caches from different threads at once.
pub trait KeyValueCache: Send + Sync + fmt::Debug {
    /// `Ok(None)` when nothing is stored at `address`.
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, address: &str, bytes: &[u8]) -> Result<()>;

    /// Returns whether a value was present. Removing a missing address is
    /// not an error.
    fn remove(&self, address: &str) -> Result<bool>;

    /// Every stored address starting with `prefix`, sorted.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Apply deletes then puts. Adapters with a native batch override this.
    fn commit_batch(&self, deletes: &[String], puts: &[(String, Vec<u8>)]) -> Result<()> {
        for address in deletes {
            self.remove(address)?;
        }
        for (address, bytes) in puts {
            self.put(address, bytes)?;
        }
        Ok(())
    }
}

/// In-memory cache.
///
/// Clones share the same map, so a test can keep a handle to inspect what
/// a proxy committed.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        sync::read(&self.data).is_empty()
    }

    /// Total stored bytes.
    pub fn size_bytes(&self) -> usize {
        sync::read(&self.data).values().map(Vec::len).sum()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        Ok(sync::read(&self.data).get(address).cloned())
    }

    fn put(&self, address: &str, bytes: &[u8]) -> Result<()> {
        sync::write(&self.data).insert(address.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, address: &str) -> Result<bool> {
        Ok(sync::write(&self.data).remove(address).is_some())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut addresses: Vec<String> = sync::read(&self.data)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    fn commit_batch(&self, deletes: &[String], puts: &[(String, Vec<u8>)]) -> Result<()> {
        let mut data = sync::write(&self.data);
        for address in deletes {
            data.remove(address);
        }
        for (address, bytes) in puts {
            data.insert(address.clone(), bytes.clone());
        }
        Ok(())
    }
}
