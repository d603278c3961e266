//! Interior node subgrids.

use std::sync::{Arc, RwLock};

use cps_common::consts::SUBGRID_TREE_CELLS_PER_SUBGRID;

use super::leaf::Leaf;
use crate::sync;

#[derive(Debug, Clone)]
pub(crate) enum Child {
    Node(Arc<Node>),
    Leaf(Arc<Leaf>),
}

/// An interior subgrid: 32×32 child slots, each empty or holding a node or
/// leaf one level down. Each node guards its own slots.
#[derive(Debug)]
pub(crate) struct Node {
    level: u8,
    children: RwLock<Vec<Option<Child>>>,
}

impl Node {
    pub(crate) fn new(level: u8) -> Self {
        Self {
            level,
            children: RwLock::new(vec![None; SUBGRID_TREE_CELLS_PER_SUBGRID]),
        }
    }

    pub(crate) fn level(&self) -> u8 {
        self.level
    }

    pub(crate) fn child(&self, slot: usize) -> Option<Child> {
        sync::read(&self.children)[slot].clone()
    }

    /// The child in `slot`, inserting `make()` first if the slot is empty.
    /// Returns the child and whether it was created.
    pub(crate) fn child_or_insert(&self, slot: usize, make: impl FnOnce() -> Child) -> (Child, bool) {
        if let Some(existing) = self.child(slot) {
            return (existing, false);
        }
        let mut children = sync::write(&self.children);
        match &children[slot] {
            Some(existing) => (existing.clone(), false),
            None => {
                let child = make();
                children[slot] = Some(child.clone());
                (child, true)
            }
        }
    }

    /// Clone of the occupied slots, taken under the read lock.
    pub(crate) fn occupied(&self) -> Vec<Child> {
        sync::read(&self.children).iter().flatten().cloned().collect()
    }
}
