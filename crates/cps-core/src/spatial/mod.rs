//! Sparse spatial index of node and leaf subgrids.
//!
//! The tree has a fixed number of levels, each subgrid fanning out 32×32.
//! Global cell coordinates are `u32` in `[0, 32^levels)`; the leaf level
//! holds 32×32 cells. World positions map onto cells through a single cell
//! size, with the world origin at the centre of the index.
//!
//! Branches are created on demand. Each node guards its own child slots,
//! so writers creating leaves in different parts of the tree do not
//! contend.

mod existence;
mod leaf;
mod node;

pub use existence::ExistenceMap;
pub use leaf::{leaf_origin, Leaf};

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cps_common::consts::{MAX_TREE_LEVELS, SUBGRID_INDEX_BITS, SUBGRID_TREE_DIMENSION};
use cps_common::{Error, Result, SubGridOrigin};

use node::{Child, Node};

/// The spatial index of one dataset.
#[derive(Debug)]
pub struct SpatialIndex {
    levels: u8,
    cell_size: f64,
    root: Arc<Node>,
    leaf_count: AtomicUsize,
}

impl SpatialIndex {
    /// Build an empty index. `levels` counts root to leaf inclusive and
    /// must be between 2 and [`MAX_TREE_LEVELS`].
    pub fn new(levels: u8, cell_size: f64) -> Result<Self> {
        if !(2..=MAX_TREE_LEVELS).contains(&levels) {
            return Err(Error::Config(format!(
                "tree levels must be between 2 and {MAX_TREE_LEVELS}, got {levels}"
            )));
        }
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(Error::Config(format!(
                "cell size must be positive, got {cell_size}"
            )));
        }
        Ok(Self {
            levels,
            cell_size,
            root: Arc::new(Node::new(1)),
            leaf_count: AtomicUsize::new(0),
        })
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Cells along one axis of the whole index.
    pub fn cells_per_axis(&self) -> u64 {
        u64::from(SUBGRID_TREE_DIMENSION).pow(u32::from(self.levels))
    }

    /// Cell offset of the world origin along each axis.
    pub fn index_origin_offset(&self) -> u64 {
        self.cells_per_axis() / 2
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count.load(Ordering::Relaxed)
    }

    /// Cell containing world position `(x, y)`, or `None` outside the index.
    pub fn cell_address_of_position(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let offset = self.index_origin_offset() as f64;
        let extent = self.cells_per_axis() as f64;
        let to_cell = |v: f64| {
            let cell = (v / self.cell_size).floor() + offset;
            (cell.is_finite() && cell >= 0.0 && cell < extent).then_some(cell as u32)
        };
        Some((to_cell(x)?, to_cell(y)?))
    }

    /// World position of the centre of cell `(x, y)`.
    pub fn cell_centre(&self, x: u32, y: u32) -> (f64, f64) {
        let offset = self.index_origin_offset() as f64;
        let centre = |c: u32| (f64::from(c) - offset + 0.5) * self.cell_size;
        (centre(x), centre(y))
    }

    /// Walk from the root to the leaf covering cell `(x, y)`.
    ///
    /// With `create_if_missing`, absent nodes and the leaf are created;
    /// otherwise `Ok(None)` is returned when any part of the path is absent.
    pub fn construct_path_to_cell(
        &self,
        x: u32,
        y: u32,
        create_if_missing: bool,
    ) -> Result<Option<Arc<Leaf>>> {
        if create_if_missing {
            let mut make = Leaf::new;
            return self
                .walk(x, y, Some(&mut make as &mut dyn FnMut(SubGridOrigin) -> Leaf))
                .map(Some);
        }
        match self.walk(x, y, None) {
            Ok(leaf) => Ok(Some(leaf)),
            Err(Error::LeafNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The existing leaf covering `(x, y)`, if any.
    pub fn locate_leaf(&self, x: u32, y: u32) -> Result<Option<Arc<Leaf>>> {
        self.construct_path_to_cell(x, y, false)
    }

    /// Place a prebuilt leaf (for example one whose directory was read from
    /// storage). An existing leaf at the same origin is kept and returned.
    pub fn install_leaf(&self, leaf: Leaf) -> Result<Arc<Leaf>> {
        let origin = leaf.origin();
        let mut leaf = Some(leaf);
        let mut make = |o: SubGridOrigin| leaf.take().unwrap_or_else(|| Leaf::new(o));
        self.walk(
            origin.x,
            origin.y,
            Some(&mut make as &mut dyn FnMut(SubGridOrigin) -> Leaf),
        )
    }

    fn walk(
        &self,
        x: u32,
        y: u32,
        mut make_leaf: Option<&mut dyn FnMut(SubGridOrigin) -> Leaf>,
    ) -> Result<Arc<Leaf>> {
        let extent = self.cells_per_axis();
        if u64::from(x) >= extent || u64::from(y) >= extent {
            return Err(Error::CellOutOfRange {
                x: u64::from(x),
                y: u64::from(y),
                extent,
            });
        }

        let mut node = Arc::clone(&self.root);
        loop {
            let slot = self.slot(&node, x, y);
            let leaf_level = node.level() + 1 == self.levels;
            let child = match make_leaf.as_mut() {
                None => node.child(slot),
                Some(make) => {
                    let (child, created) = node.child_or_insert(slot, || {
                        if leaf_level {
                            Child::Leaf(Arc::new(make(leaf_origin(x, y))))
                        } else {
                            Child::Node(Arc::new(Node::new(node.level() + 1)))
                        }
                    });
                    if created && leaf_level {
                        self.leaf_count.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(subgrid = %leaf_origin(x, y), "leaf created");
                    }
                    Some(child)
                }
            };
            match child {
                Some(Child::Leaf(leaf)) => return Ok(leaf),
                Some(Child::Node(next)) => node = next,
                None => return Err(Error::LeafNotFound { x, y }),
            }
        }
    }

    fn slot(&self, node: &Node, x: u32, y: u32) -> usize {
        let shift = SUBGRID_INDEX_BITS * u32::from(self.levels - node.level());
        let mask = SUBGRID_TREE_DIMENSION - 1;
        (((x >> shift) & mask) * SUBGRID_TREE_DIMENSION + ((y >> shift) & mask)) as usize
    }

    /// Visit every existing leaf in slot order until `visitor` breaks.
    pub fn for_each_leaf<B>(
        &self,
        mut visitor: impl FnMut(&Arc<Leaf>) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        visit(&self.root, &mut visitor)
    }

    /// All existing leaves.
    pub fn leaves(&self) -> Vec<Arc<Leaf>> {
        let mut leaves = Vec::with_capacity(self.leaf_count());
        let _ = self.for_each_leaf(|leaf| {
            leaves.push(Arc::clone(leaf));
            ControlFlow::<()>::Continue(())
        });
        leaves
    }

    /// Origins of every existing leaf.
    pub fn existence_map(&self) -> ExistenceMap {
        self.leaves().iter().map(|l| l.origin()).collect()
    }

    /// Create a leaf for every origin in `map`.
    pub fn apply_existence_map(&self, map: &ExistenceMap) -> Result<()> {
        for origin in map.iter() {
            self.construct_path_to_cell(origin.x, origin.y, true)?;
        }
        Ok(())
    }
}

fn visit<B>(node: &Node, visitor: &mut impl FnMut(&Arc<Leaf>) -> ControlFlow<B>) -> ControlFlow<B> {
    for child in node.occupied() {
        match child {
            Child::Leaf(leaf) => visitor(&leaf)?,
            Child::Node(next) => visit(&next, visitor)?,
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_geometry() {
        assert!(SpatialIndex::new(1, 0.34).is_err());
        assert!(SpatialIndex::new(MAX_TREE_LEVELS + 1, 0.34).is_err());
        assert!(SpatialIndex::new(3, 0.0).is_err());
        assert!(SpatialIndex::new(3, f64::NAN).is_err());
    }

    #[test]
    fn construct_path_creates_once() {
        let index = SpatialIndex::new(3, 1.0).expect("index");
        assert!(index.construct_path_to_cell(40, 70, false).expect("walk").is_none());

        let leaf = index
            .construct_path_to_cell(40, 70, true)
            .expect("walk")
            .expect("created");
        assert_eq!(leaf.origin(), SubGridOrigin::new(32, 64));

        let again = index.locate_leaf(63, 95).expect("walk").expect("exists");
        assert!(Arc::ptr_eq(&leaf, &again));
        assert_eq!(index.leaf_count(), 1);
        assert!(index.locate_leaf(64, 95).expect("walk").is_none());
    }

    #[test]
    fn out_of_range_cell_is_an_error() {
        let index = SpatialIndex::new(2, 1.0).expect("index");
        let err = index.construct_path_to_cell(1024, 0, true).unwrap_err();
        assert!(matches!(err, Error::CellOutOfRange { extent: 1024, .. }));
        assert!(index.construct_path_to_cell(1023, 1023, true).is_ok());
    }

    #[test]
    fn for_each_leaf_visits_and_stops_early() {
        let index = SpatialIndex::new(4, 1.0).expect("index");
        let cells = [(0, 0), (32, 0), (5000, 9000), (32767, 32767)];
        for (x, y) in cells {
            index.construct_path_to_cell(x, y, true).expect("create");
        }

        let mut seen = 0;
        let flow = index.for_each_leaf(|_| {
            seen += 1;
            ControlFlow::<()>::Continue(())
        });
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(seen, 4);

        let mut visited = 0;
        let flow = index.for_each_leaf(|leaf| {
            visited += 1;
            if leaf.origin() == SubGridOrigin::new(32, 0) {
                ControlFlow::Break(leaf.origin())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(SubGridOrigin::new(32, 0)));
        assert!(visited < 4);
    }

    #[test]
    fn positions_map_around_centre() {
        let index = SpatialIndex::new(2, 0.5).expect("index");
        assert_eq!(index.index_origin_offset(), 512);
        assert_eq!(index.cell_address_of_position(0.0, 0.0), Some((512, 512)));
        assert_eq!(index.cell_address_of_position(-0.1, 1.0), Some((511, 514)));
        assert_eq!(index.cell_address_of_position(1e9, 0.0), None);
        assert_eq!(index.cell_centre(512, 511), (0.25, -0.25));
    }

    #[test]
    fn existence_map_rebuilds_leaves() {
        let index = SpatialIndex::new(3, 1.0).expect("index");
        index.construct_path_to_cell(1, 1, true).expect("create");
        index.construct_path_to_cell(900, 33, true).expect("create");
        let map = index.existence_map();
        assert_eq!(map.len(), 2);

        let rebuilt = SpatialIndex::new(3, 1.0).expect("index");
        rebuilt.apply_existence_map(&map).expect("apply");
        assert_eq!(rebuilt.existence_map(), map);
        assert_eq!(rebuilt.leaf_count(), 2);
    }

    #[test]
    fn install_leaf_keeps_existing() {
        let index = SpatialIndex::new(2, 1.0).expect("index");
        let first = index.install_leaf(Leaf::new(SubGridOrigin::new(64, 0))).expect("install");
        let second = index.install_leaf(Leaf::new(SubGridOrigin::new(64, 0))).expect("install");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(index.leaf_count(), 1);
    }
}
