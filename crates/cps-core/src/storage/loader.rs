//! Segment payload loading through a storage proxy.

use cps_common::{DatasetId, Result, SubGridOrigin};

use super::keys::SpatialKey;
use super::proxy::{Mutability, StorageProxy};
use crate::leaf_payload::{LeafPayload, LeafPayloadKind};
use crate::pass_store::PassArrayStore;
use crate::segment::{Segment, SegmentLoader};

/// Reads segment payloads of one dataset from a [`StorageProxy`],
/// decoding the layout that matches the proxy's tier.
#[derive(Debug, Clone, Copy)]
pub struct ProxySegmentLoader<'a> {
    proxy: &'a StorageProxy,
    dataset_id: DatasetId,
}

impl<'a> ProxySegmentLoader<'a> {
    pub fn new(proxy: &'a StorageProxy, dataset_id: DatasetId) -> Self {
        Self { proxy, dataset_id }
    }

    pub fn key_for(&self, origin: SubGridOrigin, segment: &Segment) -> SpatialKey {
        SpatialKey::segment(
            segment.key_version(),
            self.dataset_id,
            origin,
            segment.time_range(),
        )
    }
}

impl SegmentLoader for ProxySegmentLoader<'_> {
    fn load(&self, origin: SubGridOrigin, segment: &Segment) -> Result<PassArrayStore> {
        let bytes = self.proxy.get(&self.key_for(origin, segment))?;
        match self.proxy.mutability() {
            Mutability::Mutable => {
                LeafPayload::from_bytes(LeafPayloadKind::CellPasses, &bytes)?.into_cell_passes()
            }
            Mutability::Immutable => PassArrayStore::from_immutable_bytes(&bytes),
        }
    }
}
