//! Binary encodings of a whole [`PassArrayStore`].
//!
//! Mutable layout: for each of the 1024 cells in row-major order (x, then
//! y), `pass_count: u32` followed by that many 38-byte passes.
//!
//! Immutable layout: magic `CPSI`, version `u8`, `cell_count: u16`, then
//! per non-empty cell `x: u8, y: u8, pass_count: u32` and its passes.
//! Empty cells cost nothing, which suits read-mostly storage.

use std::io::{Read, Write};

use cps_common::schema::IMMUTABLE_SEGMENT_VERSION;
use cps_common::{Error, Result};

use super::{cell_index, PassArrayStore, DIM};
use crate::cell_pass::{CellPass, CELL_PASS_WIRE_SIZE};
use crate::codec::{self, SliceReader};

/// Leading bytes of the immutable encoding.
pub const IMMUTABLE_MAGIC: &[u8; 4] = b"CPSI";

// Upper bound on speculative allocation while streaming an untrusted count.
const STREAM_PREALLOC_LIMIT: usize = 4096;

impl PassArrayStore {
    /// Serialize every cell in the mutable layout.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        for cell in &self.cells {
            let count = u32::try_from(cell.len())
                .map_err(|_| Error::decoding(format!("cell holds {} passes", cell.len())))?;
            codec::write_all(writer, &count.to_le_bytes())?;
            for pass in cell {
                pass.write(writer)?;
            }
        }
        Ok(())
    }

    /// Deserialize the mutable layout from a stream.
    ///
    /// Stops after the 1024th cell; a stream that ends early is a decoding
    /// error. Use [`PassArrayStore::from_bytes`] when trailing input must
    /// also be rejected.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut store = PassArrayStore::new();
        for cell in store.cells.iter_mut() {
            let count = codec::read_u32(reader, "cell pass count")? as usize;
            cell.reserve(count.min(STREAM_PREALLOC_LIMIT));
            for _ in 0..count {
                cell.push(CellPass::read(reader)?);
            }
            check_cell_order(cell)?;
        }
        Ok(store)
    }

    /// Encode to a byte vector in the mutable layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(
            self.cells.len() * 4 + self.total_pass_count() * CELL_PASS_WIRE_SIZE,
        );
        self.write(&mut buf)?;
        Ok(buf)
    }

    /// Decode a complete mutable-layout buffer.
    ///
    /// Every declared count is checked against the bytes present before
    /// any pass is read, and trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes);
        let mut store = PassArrayStore::new();
        for (index, cell) in store.cells.iter_mut().enumerate() {
            let count = codec::read_u32(&mut reader, "cell pass count")? as usize;
            reader.require(
                count.saturating_mul(CELL_PASS_WIRE_SIZE),
                format!("cell {} ({} passes)", index, count),
            )?;
            cell.reserve_exact(count);
            for _ in 0..count {
                cell.push(CellPass::read(&mut reader)?);
            }
            check_cell_order(cell)?;
        }
        reader.finish("segment")?;
        Ok(store)
    }

    /// Encode to the sparse immutable layout.
    pub fn to_immutable_bytes(&self) -> Result<Vec<u8>> {
        let cells: Vec<(usize, usize, &[CellPass])> = self.non_empty_cells().collect();
        let cell_count = u16::try_from(cells.len())
            .map_err(|_| Error::decoding("too many cells for immutable layout"))?;

        let mut buf = Vec::with_capacity(
            7 + cells.len() * 6 + self.total_pass_count() * CELL_PASS_WIRE_SIZE,
        );
        buf.extend_from_slice(IMMUTABLE_MAGIC);
        buf.push(IMMUTABLE_SEGMENT_VERSION);
        buf.extend_from_slice(&cell_count.to_le_bytes());
        for (x, y, passes) in cells {
            let count = u32::try_from(passes.len())
                .map_err(|_| Error::decoding(format!("cell holds {} passes", passes.len())))?;
            // x and y are below DIM, so they fit a byte.
            buf.push(x as u8);
            buf.push(y as u8);
            buf.extend_from_slice(&count.to_le_bytes());
            for pass in passes {
                pass.write(&mut buf)?;
            }
        }
        Ok(buf)
    }

    /// Decode the sparse immutable layout.
    pub fn from_immutable_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes);
        let mut magic = [0u8; 4];
        codec::read_exact(&mut reader, &mut magic, "immutable segment magic")?;
        if &magic != IMMUTABLE_MAGIC {
            return Err(Error::decoding("not an immutable segment"));
        }
        let version = codec::read_u8(&mut reader, "immutable segment version")?;
        if version != IMMUTABLE_SEGMENT_VERSION {
            return Err(Error::decoding(format!(
                "immutable segment version {} is not supported",
                version
            )));
        }

        let cell_count = codec::read_u16(&mut reader, "immutable cell count")?;
        let mut store = PassArrayStore::new();
        for _ in 0..cell_count {
            let x = codec::read_u8(&mut reader, "cell x")? as usize;
            let y = codec::read_u8(&mut reader, "cell y")? as usize;
            if x >= DIM || y >= DIM {
                return Err(Error::decoding(format!("cell ({x}, {y}) outside segment")));
            }
            let count = codec::read_u32(&mut reader, "cell pass count")? as usize;
            reader.require(
                count.saturating_mul(CELL_PASS_WIRE_SIZE),
                format!("cell ({x}, {y}) ({count} passes)"),
            )?;
            let cell = &mut store.cells[cell_index(x, y)];
            if !cell.is_empty() {
                return Err(Error::decoding(format!("cell ({x}, {y}) repeated")));
            }
            cell.reserve_exact(count);
            for _ in 0..count {
                cell.push(CellPass::read(&mut reader)?);
            }
            check_cell_order(cell)?;
        }
        reader.finish("immutable segment")?;
        Ok(store)
    }
}

fn check_cell_order(cell: &[CellPass]) -> Result<()> {
    if cell.is_sorted_by_key(|p| p.time) {
        Ok(())
    } else {
        Err(Error::decoding("cell passes are not in time order"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_pass::{GpsMode, PassType};
    use chrono::{TimeZone, Utc};

    fn test_pass() -> CellPass {
        CellPass {
            time: Utc.with_ymd_and_hms(2017, 1, 1, 12, 45, 0).unwrap(),
            height: 345.6,
            ccv: 101,
            mdp: 204,
            rmv: 30,
            frequency: 2700,
            amplitude: 120,
            material_temperature: 85,
            machine_id: 7,
            machine_speed: 1.25,
            gps_mode: GpsMode::Fixed,
            half_pass: true,
            pass_type: PassType::Rear,
            radio_latency: 10,
            site_model_machine_index: 3,
        }
    }

    fn full_grid_store() -> PassArrayStore {
        let mut store = PassArrayStore::new();
        for x in 0..DIM {
            for y in 0..DIM {
                store.add_pass(x, y, test_pass());
            }
        }
        store
    }

    #[test]
    fn full_segment_round_trips() {
        let store = full_grid_store();
        let bytes = store.to_bytes().expect("encode");
        assert_eq!(bytes.len(), 1024 * (4 + CELL_PASS_WIRE_SIZE));

        let decoded = PassArrayStore::from_bytes(&bytes).expect("decode");
        for x in 0..DIM {
            for y in 0..DIM {
                assert_eq!(decoded.extract_cell_passes(x, y), store.extract_cell_passes(x, y));
            }
        }

        let streamed = PassArrayStore::read(&mut bytes.as_slice()).expect("stream decode");
        assert_eq!(streamed, store);
    }

    #[test]
    fn empty_store_is_all_zero_counts() {
        let bytes = PassArrayStore::new().to_bytes().expect("encode");
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|b| *b == 0));
        assert!(PassArrayStore::from_bytes(&bytes).expect("decode").is_empty());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let bytes = full_grid_store().to_bytes().expect("encode");
        let cut = &bytes[..bytes.len() - 10];

        let err = PassArrayStore::from_bytes(cut).unwrap_err();
        assert!(err.is_decoding(), "{err}");
        let err = PassArrayStore::read(&mut &cut[..]).unwrap_err();
        assert!(err.is_decoding(), "{err}");
    }

    #[test]
    fn oversized_count_is_rejected_before_reading() {
        let mut bytes = PassArrayStore::new().to_bytes().expect("encode");
        bytes[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = PassArrayStore::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }), "{err}");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = PassArrayStore::new().to_bytes().expect("encode");
        bytes.push(0);
        assert!(PassArrayStore::from_bytes(&bytes).unwrap_err().is_decoding());
    }

    #[test]
    fn immutable_layout_is_sparse_and_round_trips() {
        let mut store = PassArrayStore::new();
        store.add_pass(3, 30, test_pass());
        let mut later = test_pass();
        later.time = later.time + chrono::Duration::minutes(5);
        store.add_pass(3, 30, later);
        store.add_pass(31, 0, test_pass());

        let bytes = store.to_immutable_bytes().expect("encode");
        assert_eq!(&bytes[..4], IMMUTABLE_MAGIC);
        assert_eq!(bytes.len(), 7 + 2 * 6 + 3 * CELL_PASS_WIRE_SIZE);
        assert_eq!(PassArrayStore::from_immutable_bytes(&bytes).expect("decode"), store);
    }

    #[test]
    fn immutable_rejects_wrong_magic_and_version() {
        let mut bytes = PassArrayStore::new().to_immutable_bytes().expect("encode");
        bytes[4] = IMMUTABLE_SEGMENT_VERSION + 1;
        assert!(PassArrayStore::from_immutable_bytes(&bytes).is_err());

        assert!(PassArrayStore::from_immutable_bytes(b"XXXX\x01\x00\x00").is_err());
        // The mutable layout is not accepted as immutable.
        let mutable = PassArrayStore::new().to_bytes().expect("encode");
        assert!(PassArrayStore::from_immutable_bytes(&mutable).is_err());
    }

    #[test]
    fn unordered_cell_is_a_decoding_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        let mut later = test_pass();
        later.time = later.time + chrono::Duration::seconds(1);
        later.write(&mut bytes).expect("write");
        test_pass().write(&mut bytes).expect("write");
        bytes.extend(std::iter::repeat_n(0u8, 1023 * 4));

        assert!(PassArrayStore::from_bytes(&bytes).unwrap_err().is_decoding());
    }
}
