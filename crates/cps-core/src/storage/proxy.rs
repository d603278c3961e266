//! Transactional, write-buffered access to the backing caches.
//!
//! Puts and removes are staged per cache kind and applied only on
//! [`StorageProxy::commit`]. Reads see staged writes first. A mutable proxy
//! may own a paired immutable proxy: every staged write is also converted
//! and staged there, and committing the mutable proxy commits the pair.
//!
//! A proxy is one unit of work for one writer. Mutation takes `&mut self`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cps_common::consts::DEFAULT_MAX_STREAM_BYTES;
use cps_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::KeyValueCache;
use super::compression::{compress, decompress};
use super::conversion::{MutabilityConverter, SegmentConverter};
use super::keys::{CacheKey, CacheKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    Immutable,
}

/// Counts reported by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitStats {
    pub num_deleted: usize,
    pub num_updated: usize,
    pub num_bytes_written: usize,
}

impl CommitStats {
    fn add(&mut self, other: CommitStats) {
        self.num_deleted += other.num_deleted;
        self.num_updated += other.num_updated;
        self.num_bytes_written += other.num_bytes_written;
    }
}

/// The backing caches of one proxy, one per [`CacheKind`].
#[derive(Debug, Clone)]
pub struct ProxyCaches {
    pub spatial: Arc<dyn KeyValueCache>,
    pub non_spatial: Arc<dyn KeyValueCache>,
}

impl ProxyCaches {
    fn get(&self, kind: CacheKind) -> &Arc<dyn KeyValueCache> {
        match kind {
            CacheKind::Spatial => &self.spatial,
            CacheKind::NonSpatial => &self.non_spatial,
        }
    }
}

#[derive(Debug, Clone)]
enum StagedOp {
    /// Compressed bytes.
    Put(Vec<u8>),
    Delete,
}

type Staged = HashMap<String, StagedOp>;

pub struct StorageProxy {
    mutability: Mutability,
    caches: ProxyCaches,
    staged: [Staged; 2],
    compression_level: u32,
    max_stream_bytes: u64,
    parallel_commit: bool,
    converter: Arc<dyn MutabilityConverter>,
    immutable: Option<Box<StorageProxy>>,
}

impl std::fmt::Debug for StorageProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProxy")
            .field("mutability", &self.mutability)
            .field("staged", &self.staged_count())
            .field("immutable", &self.immutable)
            .finish()
    }
}

impl StorageProxy {
    pub fn new(mutability: Mutability, caches: ProxyCaches) -> Self {
        Self {
            mutability,
            caches,
            staged: Default::default(),
            compression_level: 6,
            max_stream_bytes: DEFAULT_MAX_STREAM_BYTES,
            parallel_commit: true,
            converter: Arc::new(SegmentConverter),
            immutable: None,
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Reads whose decompressed stream would exceed `limit` bytes fail with
    /// a decoding error.
    pub fn with_max_stream_bytes(mut self, limit: u64) -> Self {
        self.max_stream_bytes = limit;
        self
    }

    pub fn with_parallel_commit(mut self, parallel: bool) -> Self {
        self.parallel_commit = parallel;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn MutabilityConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Pair a mutable proxy with the immutable proxy its writes project into.
    pub fn with_immutable(mut self, immutable: StorageProxy) -> Self {
        debug_assert_eq!(self.mutability, Mutability::Mutable);
        debug_assert_eq!(immutable.mutability, Mutability::Immutable);
        self.immutable = Some(Box::new(immutable));
        self
    }

    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    pub fn immutable(&self) -> Option<&StorageProxy> {
        self.immutable.as_deref()
    }

    /// Staged operations in this proxy, not counting its pair.
    pub fn staged_count(&self) -> usize {
        self.staged.iter().map(|s| s.len()).sum()
    }

    /// Compressed size of staged writes, for diagnostics.
    pub fn staged_bytes(&self) -> usize {
        self.staged
            .iter()
            .flat_map(|s| s.values())
            .map(|op| match op {
                StagedOp::Put(bytes) => bytes.len(),
                StagedOp::Delete => 0,
            })
            .sum()
    }

    /// Read a stream, staged writes first. Missing streams are
    /// [`Error::GranuleDoesNotExist`].
    pub fn get<K: CacheKey>(&self, key: &K) -> Result<Vec<u8>> {
        let address = key.address();
        match self.staged[K::KIND.index()].get(&address) {
            Some(StagedOp::Put(bytes)) => return decompress(bytes, self.max_stream_bytes),
            Some(StagedOp::Delete) => return Err(Error::not_found(address)),
            None => {}
        }

        let stored = self
            .caches
            .get(K::KIND)
            .get(&address)
            .map_err(|e| unavailable("get", key, &address, e))?;
        match stored {
            Some(bytes) => decompress(&bytes, self.max_stream_bytes),
            None => Err(Error::not_found(address)),
        }
    }

    pub fn exists_in_cache<K: CacheKey>(&self, key: &K) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stage `bytes` under `key`, replacing anything staged before.
    ///
    /// With an immutable pair, the converted stream is staged there too. A
    /// failed conversion returns [`Error::MutableToImmutableConversion`];
    /// the mutable write stays staged and the caller should write again.
    pub fn put<K: CacheKey>(&mut self, key: &K, bytes: &[u8]) -> Result<()> {
        let compressed = compress(bytes, self.compression_level)?;
        let address = key.address();
        self.stage(K::KIND, address.clone(), StagedOp::Put(compressed.clone()));

        let Some(immutable) = self.immutable.as_deref_mut() else {
            return Ok(());
        };
        let converted = decompress(&compressed, self.max_stream_bytes)
            .and_then(|raw| key.to_immutable(self.converter.as_ref(), &raw))
            .and_then(|converted| compress(&converted, immutable.compression_level));
        match converted {
            Ok(immutable_bytes) => {
                immutable.stage(K::KIND, address, StagedOp::Put(immutable_bytes));
                Ok(())
            }
            Err(e) => {
                warn!(address = %address, error = %e, "immutable conversion failed");
                // Never leave a stale projection staged for this key.
                immutable.staged[K::KIND.index()].remove(&address);
                Err(Error::MutableToImmutableConversion {
                    key: address,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stage a delete of `key`, discarding any staged write.
    pub fn remove<K: CacheKey>(&mut self, key: &K) {
        let address = key.address();
        if let Some(immutable) = self.immutable.as_deref_mut() {
            immutable.stage(K::KIND, address.clone(), StagedOp::Delete);
        }
        self.stage(K::KIND, address, StagedOp::Delete);
    }

    fn stage(&mut self, kind: CacheKind, address: String, op: StagedOp) {
        self.staged[kind.index()].insert(address, op);
    }

    /// Addresses with `prefix` in the backing cache, adjusted for staged
    /// puts and deletes.
    pub fn list_addresses(&self, kind: CacheKind, prefix: &str) -> Result<Vec<String>> {
        let stored = self.caches.get(kind).list_prefix(prefix).map_err(|e| {
            Error::CacheUnavailable {
                operation: "list".to_string(),
                dataset: String::new(),
                key: prefix.to_string(),
                reason: e.to_string(),
            }
        })?;
        let mut present: BTreeSet<String> = stored.into_iter().collect();
        for (address, op) in &self.staged[kind.index()] {
            if !address.starts_with(prefix) {
                continue;
            }
            match op {
                StagedOp::Put(_) => present.insert(address.clone()),
                StagedOp::Delete => present.remove(address),
            };
        }
        Ok(present.into_iter().collect())
    }

    /// Discard everything staged here and in the pair.
    pub fn clear(&mut self) {
        for staged in &mut self.staged {
            staged.clear();
        }
        if let Some(immutable) = self.immutable.as_deref_mut() {
            immutable.clear();
        }
    }

    /// Apply staged deletes then puts to each backing cache, then commit
    /// the immutable pair.
    ///
    /// Cache kinds commit independently (in parallel when enabled). If any
    /// fails, the error names the kinds that were applied; their staged
    /// operations are dropped while the failed kinds stay staged for a
    /// retry. Kinds cannot be rolled back once applied.
    pub fn commit(&mut self) -> Result<CommitStats> {
        let batches: Vec<(CacheKind, Batch)> = CacheKind::ALL
            .into_iter()
            .filter(|kind| !self.staged[kind.index()].is_empty())
            .map(|kind| (kind, Batch::from_staged(&self.staged[kind.index()])))
            .collect();

        let results: Vec<(CacheKind, Result<()>)> = if self.parallel_commit && batches.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = batches
                    .iter()
                    .map(|(kind, batch)| {
                        let cache = Arc::clone(self.caches.get(*kind));
                        (*kind, scope.spawn(move || batch.apply(cache.as_ref())))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(kind, handle)| {
                        let result = handle.join().unwrap_or_else(|_| {
                            Err(Error::Io(std::io::Error::other("commit worker panicked")))
                        });
                        (kind, result)
                    })
                    .collect()
            })
        } else {
            batches
                .iter()
                .map(|(kind, batch)| (*kind, batch.apply(self.caches.get(*kind).as_ref())))
                .collect()
        };

        let mut stats = CommitStats::default();
        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for ((kind, result), (_, batch)) in results.into_iter().zip(&batches) {
            match result {
                Ok(()) => {
                    stats.add(batch.stats());
                    self.staged[kind.index()].clear();
                    applied.push(kind);
                }
                Err(e) => failed.push((kind, e)),
            }
        }

        if !failed.is_empty() {
            let names = |kinds: &mut dyn Iterator<Item = CacheKind>| {
                kinds.map(|k| k.to_string()).collect::<Vec<_>>().join(", ")
            };
            let reason = failed
                .iter()
                .map(|(kind, e)| format!("{kind}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(reason = %reason, "commit failed");
            return Err(Error::CommitFailed {
                failed: names(&mut failed.iter().map(|(k, _)| *k)),
                applied: names(&mut applied.into_iter()),
                reason,
            });
        }

        if let Some(immutable) = self.immutable.as_deref_mut() {
            let pair_stats = immutable.commit().map_err(|e| Error::CommitFailed {
                failed: "immutable".to_string(),
                applied: "mutable".to_string(),
                reason: e.to_string(),
            })?;
            stats.add(pair_stats);
        }

        if stats != CommitStats::default() {
            info!(
                mutability = ?self.mutability,
                deleted = stats.num_deleted,
                updated = stats.num_updated,
                bytes = stats.num_bytes_written,
                "commit applied"
            );
        } else {
            debug!(mutability = ?self.mutability, "empty commit");
        }
        Ok(stats)
    }
}

struct Batch {
    deletes: Vec<String>,
    puts: Vec<(String, Vec<u8>)>,
}

impl Batch {
    fn from_staged(staged: &Staged) -> Self {
        let mut deletes = Vec::new();
        let mut puts = Vec::new();
        for (address, op) in staged {
            match op {
                StagedOp::Put(bytes) => puts.push((address.clone(), bytes.clone())),
                StagedOp::Delete => deletes.push(address.clone()),
            }
        }
        deletes.sort();
        puts.sort_by(|a, b| a.0.cmp(&b.0));
        Self { deletes, puts }
    }

    fn apply(&self, cache: &dyn KeyValueCache) -> Result<()> {
        cache.commit_batch(&self.deletes, &self.puts)
    }

    fn stats(&self) -> CommitStats {
        CommitStats {
            num_deleted: self.deletes.len(),
            num_updated: self.puts.len(),
            num_bytes_written: self.puts.iter().map(|(_, b)| b.len()).sum(),
        }
    }
}

fn unavailable<K: CacheKey>(operation: &str, key: &K, address: &str, e: Error) -> Error {
    Error::CacheUnavailable {
        operation: operation.to_string(),
        dataset: key.dataset_id().to_string(),
        key: address.to_string(),
        reason: e.to_string(),
    }
}
