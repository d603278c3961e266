//! Cache-backed persistence.
//!
//! - [`keys`]: spatial and non-spatial cache keys and their addresses
//! - [`cache`]: the [`KeyValueCache`] contract and [`MemoryCache`]
//! - [`file_cache`]: a directory-tree [`FileCache`]
//! - [`proxy`]: the transactional [`StorageProxy`]
//! - [`conversion`]: mutable to immutable stream projection
//! - [`loader`]: segment payload loading for iterators

pub mod cache;
pub mod compression;
pub mod conversion;
pub mod file_cache;
pub mod keys;
pub mod loader;
pub mod proxy;

use std::path::Path;
use std::sync::Arc;

use cps_common::Result;
use cps_config::StorageConfig;

pub use cache::{KeyValueCache, MemoryCache};
pub use conversion::{MutabilityConverter, SegmentConverter};
pub use file_cache::FileCache;
pub use keys::{CacheKey, CacheKind, NonSpatialKey, SpatialKey, DIRECTORY_KEY_VERSION};
pub use loader::ProxySegmentLoader;
pub use proxy::{CommitStats, Mutability, ProxyCaches, StorageProxy};

/// Build a mutable proxy over `mutable`, paired with an immutable proxy
/// over `immutable` when the configuration enables that tier.
pub fn build_proxy(
    config: &StorageConfig,
    mutable: ProxyCaches,
    immutable: Option<ProxyCaches>,
) -> StorageProxy {
    let proxy = StorageProxy::new(Mutability::Mutable, mutable)
        .with_compression_level(config.compression_level)
        .with_max_stream_bytes(config.max_stream_bytes)
        .with_parallel_commit(config.parallel_commit);
    match immutable {
        Some(caches) if config.immutable_tier => proxy.with_immutable(
            StorageProxy::new(Mutability::Immutable, caches)
                .with_compression_level(config.compression_level)
                .with_max_stream_bytes(config.max_stream_bytes)
                .with_parallel_commit(config.parallel_commit),
        ),
        _ => proxy,
    }
}

/// File-backed caches laid out below `root`:
/// `mutable/{spatial,non-spatial}` and `immutable/{spatial,non-spatial}`.
pub fn file_caches(root: &Path) -> Result<(ProxyCaches, ProxyCaches)> {
    let open = |tier: &str| -> Result<ProxyCaches> {
        Ok(ProxyCaches {
            spatial: Arc::new(FileCache::open(root.join(tier).join("spatial"))?),
            non_spatial: Arc::new(FileCache::open(root.join(tier).join("non-spatial"))?),
        })
    };
    Ok((open("mutable")?, open("immutable")?))
}

/// Fresh in-memory caches for both tiers.
pub fn memory_caches() -> (ProxyCaches, ProxyCaches) {
    let make = || ProxyCaches {
        spatial: Arc::new(MemoryCache::new()),
        non_spatial: Arc::new(MemoryCache::new()),
    };
    (make(), make())
}
