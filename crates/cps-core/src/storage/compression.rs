//! Deflate compression of stored streams.

use std::io::{Read, Write};

use cps_common::{Error, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

/// Compress `bytes` at `level` (0-9).
pub fn compress(bytes: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(bytes.len() / 4 + 16),
        Compression::new(level.min(9)),
    );
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a stream produced by [`compress`]. Output longer than `limit`
/// bytes is a decoding error.
pub fn decompress(bytes: &[u8], limit: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(4).min(limit as usize));
    DeflateDecoder::new(bytes)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| Error::decoding(format!("corrupt compressed stream: {e}")))?;
    if out.len() as u64 > limit {
        return Err(Error::decoding(format!(
            "decompressed stream exceeds {limit} bytes"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1 << 20;

    #[test]
    fn round_trip_shrinks_repetitive_input() {
        let input = vec![7u8; 40_000];
        let packed = compress(&input, 6).expect("compress");
        assert!(packed.len() < input.len() / 10);
        assert_eq!(decompress(&packed, LIMIT).expect("decompress"), input);
    }

    #[test]
    fn level_zero_still_round_trips() {
        let input = b"abc".repeat(100);
        let packed = compress(&input, 0).expect("compress");
        assert_eq!(decompress(&packed, LIMIT).expect("decompress"), input);
    }

    #[test]
    fn garbage_is_a_decoding_error() {
        let err = decompress(&[0xff, 0xff, 0xff, 0xff], LIMIT).unwrap_err();
        assert!(err.is_decoding());
    }

    #[test]
    fn output_past_the_limit_is_rejected() {
        let input = vec![0u8; 10_000];
        let packed = compress(&input, 9).expect("compress");
        assert!(packed.len() < 100);

        assert_eq!(decompress(&packed, 10_000).expect("at limit").len(), 10_000);
        let err = decompress(&packed, 9_999).unwrap_err();
        assert!(err.is_decoding());
        assert!(err.to_string().contains("9999"));
    }
}
