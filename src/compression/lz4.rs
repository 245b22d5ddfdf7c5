//! Pure-Rust LZ4 block compressor.
//!
//! Real game containers are Kraken-compressed and need [`super::OodleCompressor`],
//! but the frame layout does not care which codec produced the payload.
//! This implementation backs tests and synthetic containers without a
//! native library on disk.

use crate::error::{Error, Result};

use super::BlockCompressor;

/// Block compressor backed by `lz4_flex`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl BlockCompressor for Lz4Compressor {
    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress(src))
    }

    fn decompress(&self, src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let out = lz4_flex::decompress(src, expected_len).map_err(|_| {
            Error::DecompressionFailed {
                index: 0,
                expected: expected_len,
                actual: 0,
            }
        })?;
        if out.len() != expected_len {
            return Err(Error::DecompressionFailed {
                index: 0,
                expected: expected_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }

    fn max_compressed_size(&self, len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let codec = Lz4Compressor;
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = codec.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        let unpacked = codec.decompress(&packed, data.len()).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn wrong_expected_size_fails() {
        let codec = Lz4Compressor;
        let packed = codec.compress(&[7u8; 64]).unwrap();
        assert!(codec.decompress(&packed, 63).is_err());
    }
}
