//! Little-endian primitive I/O shared by the segment wire formats.

use cps_common::{Error, Result};
use std::io::{ErrorKind, Read, Write};

/// Fill `buf` from `reader`, mapping a short read to a decoding error.
pub(crate) fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::decoding(format!("unexpected end of stream reading {what}"))
        } else {
            Error::Io(e)
        }
    })
}

pub(crate) fn read_u8<R: Read>(reader: &mut R, what: &str) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf, what)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(reader: &mut R, what: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf, what)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn write_all<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).map_err(Error::Io)
}

/// A reader over a byte slice that knows how much input remains.
///
/// Whole-buffer decoders use it to check declared counts against the bytes
/// actually present before allocating.
pub(crate) struct SliceReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Fail with [`Error::Truncated`] unless `needed` bytes remain.
    pub(crate) fn require(&self, needed: usize, context: impl Into<String>) -> Result<()> {
        if needed > self.remaining() {
            return Err(Error::Truncated {
                context: context.into(),
                expected: needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Fail unless the whole buffer has been consumed.
    pub(crate) fn finish(&self, context: &str) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::decoding(format!(
                "{n} trailing bytes after {context}"
            ))),
        }
    }
}

impl Read for SliceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
