//! Block compression for deferred buffers.
//!
//! Buffer payloads are compressed with an external general-purpose codec.
//! The codec is behind the [`BlockCompressor`] trait so the production
//! Oodle library can be swapped for a pure-Rust implementation in tests
//! and when writing synthetic containers.

use crate::error::Result;

pub mod lz4;
pub mod oodle;

pub use lz4::Lz4Compressor;
pub use oodle::OodleCompressor;

/// A stateless block compressor invoked once per buffer.
///
/// Implementations are not required to be thread-safe; the codec core
/// serializes calls (one file operation at a time).
pub trait BlockCompressor {
    /// Compress `src` at the codec's maximum quality level.
    ///
    /// # Errors
    /// Returns [`crate::Error::CompressionFailed`] if the codec reports failure.
    fn compress(&self, src: &[u8]) -> Result<Vec<u8>>;

    /// Decompress `src`, producing exactly `expected_len` bytes.
    ///
    /// # Errors
    /// Returns an error if the codec fails or produces a different size.
    fn decompress(&self, src: &[u8], expected_len: usize) -> Result<Vec<u8>>;

    /// Worst-case compressed size for an input of `len` bytes.
    fn max_compressed_size(&self, len: usize) -> usize;
}
