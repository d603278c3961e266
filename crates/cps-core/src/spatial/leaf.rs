//! Leaf subgrids: the 32×32 cell blocks at the bottom of the tree.

use cps_common::consts::SUBGRID_TREE_DIMENSION;
use cps_common::SubGridOrigin;

use crate::segment::SegmentDirectory;

/// A leaf subgrid and the segment directory holding its pass history.
#[derive(Debug)]
pub struct Leaf {
    origin: SubGridOrigin,
    directory: SegmentDirectory,
}

impl Leaf {
    pub fn new(origin: SubGridOrigin) -> Self {
        Self::with_directory(origin, SegmentDirectory::new())
    }

    pub fn with_directory(origin: SubGridOrigin, directory: SegmentDirectory) -> Self {
        Self { origin, directory }
    }

    pub fn origin(&self) -> SubGridOrigin {
        self.origin
    }

    pub fn directory(&self) -> &SegmentDirectory {
        &self.directory
    }

    /// Whether global cell `(x, y)` falls inside this leaf.
    pub fn covers(&self, x: u32, y: u32) -> bool {
        x.wrapping_sub(self.origin.x) < SUBGRID_TREE_DIMENSION
            && y.wrapping_sub(self.origin.y) < SUBGRID_TREE_DIMENSION
    }

    /// Leaf-relative coordinates of global cell `(x, y)`.
    pub fn local(&self, x: u32, y: u32) -> (usize, usize) {
        let mask = SUBGRID_TREE_DIMENSION - 1;
        ((x & mask) as usize, (y & mask) as usize)
    }
}

/// Origin of the leaf containing global cell `(x, y)`.
pub fn leaf_origin(x: u32, y: u32) -> SubGridOrigin {
    let mask = !(SUBGRID_TREE_DIMENSION - 1);
    SubGridOrigin::new(x & mask, y & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_and_local_split_coordinates() {
        let origin = leaf_origin(100, 65);
        assert_eq!(origin, SubGridOrigin::new(96, 64));

        let leaf = Leaf::new(origin);
        assert!(leaf.covers(100, 65));
        assert!(leaf.covers(127, 95));
        assert!(!leaf.covers(128, 65));
        assert!(!leaf.covers(95, 65));
        assert_eq!(leaf.local(100, 65), (4, 1));
    }
}
