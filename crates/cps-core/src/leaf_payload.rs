//! The closed set of payloads a leaf subgrid can carry.
//!
//! Only cell pass stores have a binary wire format. Scalar grids are
//! derived, in-memory products (for example the latest height per cell)
//! and refuse binary (de)serialization with
//! [`Error::UnsupportedOperation`].

use cps_common::consts::NULL_HEIGHT;
use cps_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::pass_store::{PassArrayStore, DIM};

/// Discriminant used when decoding a payload from bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafPayloadKind {
    CellPasses,
    FloatGrid,
}

/// A 32×32 grid of `f32`, indexed `[x][y]`, NULL cells holding
/// [`NULL_HEIGHT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatGrid {
    cells: Vec<f32>,
}

impl Default for FloatGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl FloatGrid {
    pub fn new() -> Self {
        Self {
            cells: vec![NULL_HEIGHT; DIM * DIM],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.cells[x * DIM + y]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.cells[x * DIM + y] = value;
    }

    pub fn is_null(&self, x: usize, y: usize) -> bool {
        self.get(x, y).to_bits() == NULL_HEIGHT.to_bits()
    }

    /// Number of non-NULL cells.
    pub fn populated(&self) -> usize {
        self.cells
            .iter()
            .filter(|v| v.to_bits() != NULL_HEIGHT.to_bits())
            .count()
    }
}

/// Payload of a leaf subgrid.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafPayload {
    CellPasses(PassArrayStore),
    FloatGrid(FloatGrid),
}

impl LeafPayload {
    pub fn kind(&self) -> LeafPayloadKind {
        match self {
            LeafPayload::CellPasses(_) => LeafPayloadKind::CellPasses,
            LeafPayload::FloatGrid(_) => LeafPayloadKind::FloatGrid,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            LeafPayload::CellPasses(store) => store.to_bytes(),
            LeafPayload::FloatGrid(_) => Err(Error::unsupported(
                "float grid leaves have no binary serialization",
            )),
        }
    }

    pub fn from_bytes(kind: LeafPayloadKind, bytes: &[u8]) -> Result<Self> {
        match kind {
            LeafPayloadKind::CellPasses => {
                PassArrayStore::from_bytes(bytes).map(LeafPayload::CellPasses)
            }
            LeafPayloadKind::FloatGrid => Err(Error::unsupported(
                "float grid leaves have no binary deserialization",
            )),
        }
    }

    /// Unwrap a cell pass store, failing for any other payload.
    pub fn into_cell_passes(self) -> Result<PassArrayStore> {
        match self {
            LeafPayload::CellPasses(store) => Ok(store),
            other => Err(Error::unsupported(format!(
                "expected a cell pass payload, found {:?}",
                other.kind()
            ))),
        }
    }
}
