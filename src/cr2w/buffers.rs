//! Deferred buffer store: KARK framing, sidecar fallback, and the
//! buffer-table offset cascade.
//!
//! A compressed buffer's disk payload is an 8-byte frame (`KARK` magic +
//! decompressed size) followed by codec output. Replacing a buffer changes
//! its size and therefore the file offset of every buffer behind it; the
//! rewrite is computed as one immutable plan and applied in a single pass
//! so no partially-patched table is ever observable.

use std::path::{Path, PathBuf};

use crate::compression::BlockCompressor;
use crate::error::{Error, Result};
use crate::io::ByteCursor;

use super::container::{BufferDescriptor, Container, OFF_FILE_SIZE};

/// `b"KARK"` read as a little-endian u32.
pub const KARK_MAGIC: u32 = u32::from_le_bytes(*b"KARK");
/// Frame header: magic + decompressed size.
pub const FRAME_HEADER_LEN: usize = 8;

/// Path of the sidecar file holding buffer `index` uncompressed:
/// `<container>.<index>.buffer`.
#[must_use]
pub fn sidecar_path(container: &Path, index: usize) -> PathBuf {
    let mut name = container.as_os_str().to_os_string();
    name.push(format!(".{index}.buffer"));
    PathBuf::from(name)
}

/// Decompress one buffer out of the container bytes.
///
/// Raw buffers (`disk_size == mem_size`) are returned as stored. Framed
/// buffers are read past the 8-byte header and run through `codec`,
/// requesting exactly `mem_size` output bytes.
///
/// # Errors
/// [`Error::DecompressionFailed`] on a codec size mismatch — a truncated
/// result is never silently returned.
pub fn read_buffer(
    container: &Container,
    index: usize,
    codec: &dyn BlockCompressor,
) -> Result<Vec<u8>> {
    let descriptor = container
        .buffers
        .get(index)
        .ok_or(Error::BufferIndexOutOfRange {
            index,
            count: container.buffers.len(),
        })?;

    let start = descriptor.offset as usize;
    let disk = descriptor.disk_size as usize;
    if start + disk > container.cursor.len() {
        return Err(Error::corrupt(format!(
            "buffer {index} payload [{start}, +{disk}) out of bounds"
        )));
    }
    let stored = &container.cursor.bytes()[start..start + disk];

    if !descriptor.is_compressed() {
        tracing::debug!("buffer {index}: stored raw, {disk} bytes");
        return Ok(stored.to_vec());
    }
    if disk < FRAME_HEADER_LEN {
        return Err(Error::corrupt(format!(
            "buffer {index}: compressed payload shorter than frame header"
        )));
    }

    let expected = descriptor.mem_size as usize;
    let payload = &stored[FRAME_HEADER_LEN..];
    let out = codec
        .decompress(payload, expected)
        .map_err(|e| match e {
            Error::DecompressionFailed { actual, .. } => Error::DecompressionFailed {
                index: descriptor.index,
                expected,
                actual,
            },
            other => other,
        })?;
    tracing::debug!("buffer {index}: {} -> {} bytes", payload.len(), out.len());
    Ok(out)
}

/// Compress a payload and prepend the KARK frame header.
///
/// # Errors
/// Propagates [`Error::CompressionFailed`] from the codec.
pub fn frame_buffer(payload: &[u8], codec: &dyn BlockCompressor) -> Result<Vec<u8>> {
    let compressed = codec.compress(payload)?;
    let mut framed = ByteCursor::empty();
    framed.write_u32(KARK_MAGIC);
    framed.write_u32(payload.len() as u32);
    framed.write_bytes(&compressed);
    Ok(framed.into_bytes())
}

/// Pending buffer replacements plus the resulting descriptor states.
///
/// All size deltas are computed into descriptor copies first; nothing in
/// the container is touched until [`BufferPatch::apply`] rewrites payloads
/// and table entries together.
pub struct BufferPatch {
    descriptors: Vec<BufferDescriptor>,
    replacements: Vec<Option<Vec<u8>>>,
}

impl BufferPatch {
    /// Start a patch plan over the container's current buffer table.
    #[must_use]
    pub fn new(container: &Container) -> Self {
        Self {
            descriptors: container.buffers.clone(),
            replacements: vec![None; container.buffers.len()],
        }
    }

    /// Replace buffer `index` with a freshly compressed `payload`.
    ///
    /// Updates the planned descriptor (disk/mem size, CRC) and shifts the
    /// planned offset of every buffer whose original offset lies past the
    /// replaced one by the framed-size delta.
    ///
    /// # Errors
    /// Fails on an out-of-range index or codec failure.
    pub fn replace(
        &mut self,
        index: usize,
        payload: &[u8],
        codec: &dyn BlockCompressor,
    ) -> Result<()> {
        let count = self.descriptors.len();
        if index >= count {
            return Err(Error::BufferIndexOutOfRange { index, count });
        }

        let framed = frame_buffer(payload, codec)?;
        let old_offset = self.descriptors[index].offset;
        let delta = framed.len() as i64 - self.descriptors[index].disk_size as i64;

        self.descriptors[index].disk_size = framed.len() as u32;
        self.descriptors[index].mem_size = payload.len() as u32;
        self.descriptors[index].crc32 = crc32fast::hash(&framed);
        self.replacements[index] = Some(framed);

        for descriptor in &mut self.descriptors {
            if descriptor.offset > old_offset {
                descriptor.offset = (descriptor.offset as i64 + delta) as u32;
            }
        }
        tracing::debug!("buffer {index}: replaced, offset cascade delta {delta}");
        Ok(())
    }

    /// Planned descriptor states (used by tests and diagnostics).
    #[must_use]
    pub fn descriptors(&self) -> &[BufferDescriptor] {
        &self.descriptors
    }

    /// Assemble the output file: the (possibly already patched) container
    /// head up to the first buffer, every payload (original or replacement)
    /// in table order, then the rewritten descriptor table and total-size
    /// field.
    ///
    /// `head` supplies the pre-buffer content — pass the container's own
    /// bytes when nothing outside the buffer region changed.
    ///
    /// # Errors
    /// Fails if an original payload lies outside the source file.
    pub fn apply(self, container: &Container, head: &[u8]) -> Result<Vec<u8>> {
        let head_len = container
            .buffers
            .iter()
            .map(|b| b.offset as usize)
            .min()
            .map_or(head.len(), |first| {
                // The head may have grown or shrunk (embedded-buffer splice);
                // the shift applies to everything past the original head.
                (first as i64 + head.len() as i64 - container.cursor.len() as i64).max(0) as usize
            })
            .min(head.len());

        let mut out = ByteCursor::new(head[..head_len].to_vec());
        out.seek(head_len);

        let mut final_descriptors = self.descriptors;
        for (i, descriptor) in final_descriptors.iter_mut().enumerate() {
            let payload: Vec<u8> = match &self.replacements[i] {
                Some(framed) => framed.clone(),
                None => {
                    let original = &container.buffers[i];
                    let start = original.offset as usize;
                    let end = start + original.disk_size as usize;
                    if end > container.cursor.len() {
                        return Err(Error::corrupt(format!(
                            "buffer {i} payload [{start}, {end}) out of bounds"
                        )));
                    }
                    container.cursor.bytes()[start..end].to_vec()
                }
            };
            descriptor.offset = out.tell() as u32;
            descriptor.disk_size = payload.len() as u32;
            out.write_bytes(&payload);
        }

        // Single patch pass over the table: offsets, sizes, checksums.
        for descriptor in &final_descriptors {
            out.seek(descriptor.table_offset + 8);
            out.write_u32(descriptor.offset);
            out.write_u32(descriptor.disk_size);
            out.write_u32(descriptor.mem_size);
            out.write_u32(descriptor.crc32);
        }
        let total = out.len() as u32;
        out.write_u32_at(OFF_FILE_SIZE, total);
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Lz4Compressor;

    #[test]
    fn sidecar_naming() {
        let p = sidecar_path(Path::new("/tmp/body.mesh"), 2);
        assert_eq!(p, Path::new("/tmp/body.mesh.2.buffer"));
    }

    #[test]
    fn frame_header_layout() {
        let framed = frame_buffer(&[9u8; 100], &Lz4Compressor).unwrap();
        let mut c = ByteCursor::new(framed);
        assert_eq!(c.read_u32().unwrap(), KARK_MAGIC);
        assert_eq!(c.read_u32().unwrap(), 100);
    }
}
