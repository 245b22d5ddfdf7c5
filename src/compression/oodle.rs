//! Oodle dynamic library bindings.
//!
//! The game ships `oo2ext_7_win64` (or a platform equivalent); nothing is
//! linked at build time. Symbols are resolved at runtime with `libloading`
//! and calls go through plain function pointers, matching how the game's
//! own tooling invokes the codec.

use std::ffi::OsStr;
use std::os::raw::c_void;
use std::ptr::null_mut;
use std::sync::Arc;

use libloading::Library;

use crate::error::{Error, Result};

use super::BlockCompressor;

/// Kraken, the codec the game compresses deferred buffers with.
const CODEC_KRAKEN: i64 = 8;
/// "Optimal2" encode level.
const LEVEL_OPTIMAL: i64 = 9;
/// Decode thread phase: unthreaded.
const THREAD_PHASE_ALL: i64 = 3;

type DecompressFn = unsafe extern "C" fn(
    src: *const u8,
    src_len: i64,
    dst: *mut u8,
    dst_len: i64,
    fuzz_safe: i64,
    check_crc: i64,
    verbosity: i64,
    dec_buf_base: *mut c_void,
    dec_buf_size: *mut c_void,
    fp_callback: *mut c_void,
    callback_user_data: *mut c_void,
    decoder_memory: *mut c_void,
    decoder_memory_size: *mut c_void,
    thread_phase: i64,
) -> i64;

type CompressFn = unsafe extern "C" fn(
    codec: i64,
    src: *const u8,
    src_len: i64,
    dst: *mut u8,
    level: i64,
    opts: *mut c_void,
    dictionary_base: *mut c_void,
    lrm: *mut c_void,
    scratch: *mut c_void,
    scratch_size: i64,
) -> i64;

type CompressedSizeNeededFn = unsafe extern "C" fn(src_len: i64) -> i64;

/// Block compressor backed by a loaded Oodle shared library.
#[derive(Clone)]
pub struct OodleCompressor {
    /// Keeps the library mapped for the lifetime of the function pointers.
    #[allow(unused)]
    library: Arc<Library>,
    decompress: DecompressFn,
    compress: CompressFn,
    compressed_size_needed: CompressedSizeNeededFn,
}

impl OodleCompressor {
    /// Load an Oodle shared library from the given module name or path.
    ///
    /// # Safety
    ///
    /// It is up to the caller to ensure that a correct Oodle library is
    /// loaded and that its initialization routines do not modify platform
    /// globals this process depends on.
    ///
    /// # Errors
    /// Returns [`Error::CodecUnavailable`] if the library or one of its
    /// symbols cannot be resolved.
    pub unsafe fn load<S: AsRef<OsStr>>(library: S) -> Result<Self> {
        let library = Arc::new(Library::new(library).map_err(|e| Error::CodecUnavailable {
            message: e.to_string(),
        })?);

        let decompress = *library
            .get(b"OodleLZ_Decompress\0")
            .map_err(|e| Error::CodecUnavailable {
                message: e.to_string(),
            })?;
        let compress = *library
            .get(b"OodleLZ_Compress\0")
            .map_err(|e| Error::CodecUnavailable {
                message: e.to_string(),
            })?;
        let compressed_size_needed = *library
            .get(b"OodleLZ_GetCompressedBufferSizeNeeded\0")
            .map_err(|e| Error::CodecUnavailable {
                message: e.to_string(),
            })?;

        Ok(Self {
            library,
            decompress,
            compress,
            compressed_size_needed,
        })
    }
}

impl BlockCompressor for OodleCompressor {
    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        let capacity = self.max_compressed_size(src.len());
        let mut dst = vec![0u8; capacity];

        // Safety: dst holds the worst-case output size reported by the
        // library itself; src/dst stay alive across the call.
        let written = unsafe {
            (self.compress)(
                CODEC_KRAKEN,
                src.as_ptr(),
                src.len() as i64,
                dst.as_mut_ptr(),
                LEVEL_OPTIMAL,
                null_mut(),
                null_mut(),
                null_mut(),
                null_mut(),
                0,
            )
        };

        if written <= 0 {
            return Err(Error::CompressionFailed {
                message: format!("OodleLZ_Compress returned {written}"),
            });
        }
        dst.truncate(written as usize);
        Ok(dst)
    }

    fn decompress(&self, src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut dst = vec![0u8; expected_len];

        // Safety: dst is exactly the declared decompressed size; the codec
        // is fuzz-safe against truncated input and reports short output.
        let written = unsafe {
            (self.decompress)(
                src.as_ptr(),
                src.len() as i64,
                dst.as_mut_ptr(),
                expected_len as i64,
                0,
                0,
                0,
                null_mut(),
                null_mut(),
                null_mut(),
                null_mut(),
                null_mut(),
                null_mut(),
                THREAD_PHASE_ALL,
            )
        };

        if written != expected_len as i64 {
            return Err(Error::DecompressionFailed {
                index: 0,
                expected: expected_len,
                actual: written.max(0) as usize,
            });
        }
        Ok(dst)
    }

    fn max_compressed_size(&self, len: usize) -> usize {
        // Safety: pure arithmetic query, no memory access.
        let needed = unsafe { (self.compressed_size_needed)(len as i64) };
        needed.max(0) as usize
    }
}
